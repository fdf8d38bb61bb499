//! 实时变更通知
//!
//! - [`ChangeSubscription`]：单表订阅句柄，`unsubscribe()` / Drop 时释放底层通道
//! - [`LocalChangeFeed`]：进程内广播（MemoryBackend 与测试使用）
//! - [`PhoenixRealtime`]：托管 Realtime 服务的 WebSocket 客户端（Phoenix channel 协议）

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::RealtimeApi;
use crate::error::{BistroSDKError, Result};
use crate::sdk::BackendConfig;

/// Phoenix 心跳间隔
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// 变更类型（`All` 为通配订阅）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    All,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::All => "*",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "*" => Some(Self::All),
            _ => None,
        }
    }

    /// 订阅类型是否覆盖某个具体变更
    pub fn covers(self, other: ChangeKind) -> bool {
        self == ChangeKind::All || self == other
    }
}

/// 单条变更通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
    pub commit_timestamp: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("连接 Realtime 失败: {0}")]
    Connect(String),
    #[error("Realtime 协议错误: {0}")]
    Protocol(String),
    #[error("加入频道 {topic} 被拒绝: {reason}")]
    JoinRejected { topic: String, reason: String },
}

impl From<RealtimeError> for BistroSDKError {
    fn from(error: RealtimeError) -> Self {
        BistroSDKError::Realtime(error.to_string())
    }
}

/// 单表订阅句柄
///
/// 持有者负责在不再需要时调用 `unsubscribe()`；Drop 时同样会取消，避免泄漏活跃通道。
#[derive(Debug)]
pub struct ChangeSubscription {
    table: String,
    receiver: mpsc::UnboundedReceiver<ChangeNotification>,
    cancel: CancellationToken,
}

impl ChangeSubscription {
    pub fn new(
        table: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<ChangeNotification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            table: table.into(),
            receiver,
            cancel,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// 接收下一条通知；取消或通道关闭后返回 None
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            note = self.receiver.recv() => note,
        }
    }

    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            debug!("取消订阅: {}", self.table);
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 取消令牌（供持有者在不持有句柄时取消）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 进程内变更广播
#[derive(Debug, Clone)]
pub struct LocalChangeFeed {
    sender: broadcast::Sender<ChangeNotification>,
    active: Arc<AtomicUsize>,
}

impl LocalChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 发布变更（无订阅者时静默丢弃）
    pub fn publish(&self, notification: ChangeNotification) {
        if let Err(e) = self.sender.send(notification) {
            debug!("No active change subscribers: {}", e);
        }
    }

    /// 当前仍在转发的订阅数量
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn open(&self, table: &str, kind: ChangeKind) -> ChangeSubscription {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let active = self.active.clone();
        let wanted = table.to_string();

        active.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    msg = source.recv() => match msg {
                        Ok(note) => {
                            if note.table != wanted || !kind.covers(note.kind) {
                                continue;
                            }
                            if tx.send(note).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("⚠️ 变更通知积压，跳过 {} 条 (table={})", skipped, wanted);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
            debug!("本地变更转发结束: {}", wanted);
        });

        ChangeSubscription::new(table, rx, cancel)
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl RealtimeApi for LocalChangeFeed {
    async fn subscribe(&self, table: &str, kind: ChangeKind) -> Result<ChangeSubscription> {
        Ok(self.open(table, kind))
    }
}

/// Phoenix 帧解析结果
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Change(ChangeNotification),
    JoinOk,
    JoinError(String),
    Closed(String),
    Ignored,
}

/// 托管 Realtime 服务的 WebSocket 客户端
///
/// 每个订阅独占一条 socket，加入 `realtime:public:{table}` 频道。
#[derive(Debug)]
pub struct PhoenixRealtime {
    socket_url: String,
    schema: String,
    /// 已登录用户的 token，加入频道时携带以通过行级权限
    access_token: Option<String>,
    next_ref: Arc<AtomicU64>,
}

impl PhoenixRealtime {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            socket_url: config.realtime_url()?,
            schema: "public".to_string(),
            access_token: config.access_token.clone().filter(|t| !t.trim().is_empty()),
            next_ref: Arc::new(AtomicU64::new(1)),
        })
    }

    fn topic(&self, table: &str) -> String {
        format!("realtime:{}:{}", self.schema, table)
    }
}

pub(crate) fn join_message(
    topic: &str,
    schema: &str,
    table: &str,
    kind: ChangeKind,
    access_token: Option<&str>,
    msg_ref: u64,
) -> Value {
    let mut payload = json!({
        "config": {
            "postgres_changes": [
                { "event": kind.as_str(), "schema": schema, "table": table }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": payload,
        "ref": msg_ref.to_string(),
    })
}

pub(crate) fn leave_message(topic: &str, msg_ref: u64) -> Value {
    json!({ "topic": topic, "event": "phx_leave", "payload": {}, "ref": msg_ref.to_string() })
}

pub(crate) fn heartbeat_message(msg_ref: u64) -> Value {
    json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": msg_ref.to_string() })
}

/// 解析一帧文本消息
pub(crate) fn parse_frame(text: &str, topic: &str, table: &str) -> std::result::Result<Frame, RealtimeError> {
    let frame: Value =
        serde_json::from_str(text).map_err(|e| RealtimeError::Protocol(format!("无效帧: {}", e)))?;
    if frame.get("topic").and_then(Value::as_str) != Some(topic) {
        return Ok(Frame::Ignored);
    }
    let event = frame.get("event").and_then(Value::as_str).unwrap_or_default();
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);

    match event {
        "phx_reply" => {
            let status = payload.get("status").and_then(Value::as_str).unwrap_or_default();
            if status == "ok" {
                Ok(Frame::JoinOk)
            } else {
                let reason = payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .unwrap_or(status)
                    .to_string();
                Ok(Frame::JoinError(reason))
            }
        }
        "phx_error" => Ok(Frame::Closed("phx_error".to_string())),
        "phx_close" => Ok(Frame::Closed("phx_close".to_string())),
        "postgres_changes" => {
            let data = payload
                .get("data")
                .ok_or_else(|| RealtimeError::Protocol("postgres_changes 缺少 data".to_string()))?;
            Ok(change_from_data(data, table))
        }
        // 旧版协议：事件名即变更类型
        "INSERT" | "UPDATE" | "DELETE" => Ok(change_from_data(&payload, table)),
        _ => Ok(Frame::Ignored),
    }
}

fn change_from_data(data: &Value, table: &str) -> Frame {
    let Some(kind) = data.get("type").and_then(Value::as_str).and_then(ChangeKind::parse) else {
        return Frame::Ignored;
    };
    let non_empty = |key: &str| data.get(key).filter(|v| !v.is_null()).cloned();
    Frame::Change(ChangeNotification {
        table: data
            .get("table")
            .and_then(Value::as_str)
            .unwrap_or(table)
            .to_string(),
        kind,
        record: non_empty("record"),
        old_record: non_empty("old_record"),
        commit_timestamp: data
            .get("commit_timestamp")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[async_trait]
impl RealtimeApi for PhoenixRealtime {
    async fn subscribe(&self, table: &str, kind: ChangeKind) -> Result<ChangeSubscription> {
        let (mut socket, _) = tokio_tungstenite::connect_async(self.socket_url.as_str())
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;

        let topic = self.topic(table);
        let join = join_message(
            &topic,
            &self.schema,
            table,
            kind,
            self.access_token.as_deref(),
            self.next_ref.fetch_add(1, Ordering::SeqCst),
        );
        socket
            .send(Message::Text(join.to_string()))
            .await
            .map_err(|e| RealtimeError::Connect(e.to_string()))?;
        info!("📡 已发送 phx_join: {}", topic);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let next_ref = self.next_ref.clone();
        let table_name = table.to_string();

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        let leave = leave_message(&topic, next_ref.fetch_add(1, Ordering::SeqCst));
                        let _ = socket.send(Message::Text(leave.to_string())).await;
                        let _ = socket.close(None).await;
                        info!("🔌 已离开频道: {}", topic);
                        break;
                    }
                    _ = heartbeat.tick() => {
                        let beat = heartbeat_message(next_ref.fetch_add(1, Ordering::SeqCst));
                        if let Err(e) = socket.send(Message::Text(beat.to_string())).await {
                            warn!("⚠️ 心跳发送失败 ({}): {}", topic, e);
                            break;
                        }
                    }
                    incoming = socket.next() => {
                        let text = match incoming {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("⚠️ Realtime 连接已关闭: {}", topic);
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                error!("❌ Realtime 读取失败 ({}): {}", topic, e);
                                break;
                            }
                        };
                        match parse_frame(&text, &topic, &table_name) {
                            Ok(Frame::Change(note)) => {
                                if !kind.covers(note.kind) {
                                    continue;
                                }
                                if tx.send(note).is_err() {
                                    break;
                                }
                            }
                            Ok(Frame::JoinOk) => debug!("频道已加入: {}", topic),
                            Ok(Frame::JoinError(reason)) => {
                                let err = RealtimeError::JoinRejected { topic: topic.clone(), reason };
                                error!("❌ {}", err);
                                break;
                            }
                            Ok(Frame::Closed(reason)) => {
                                warn!("⚠️ 频道被服务端关闭 ({}): {}", topic, reason);
                                break;
                            }
                            Ok(Frame::Ignored) => {}
                            Err(e) => warn!("⚠️ {}", e),
                        }
                    }
                }
            }
        });

        Ok(ChangeSubscription::new(table, rx, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(table: &str, kind: ChangeKind) -> ChangeNotification {
        ChangeNotification {
            table: table.to_string(),
            kind,
            record: Some(json!({"id": "1"})),
            old_record: None,
            commit_timestamp: None,
        }
    }

    #[tokio::test]
    async fn local_feed_filters_by_table_and_kind() {
        let feed = LocalChangeFeed::default();
        let mut deletes = feed.open("events", ChangeKind::Delete);
        let mut all = feed.open("events", ChangeKind::All);

        feed.publish(note("reviews", ChangeKind::Delete));
        feed.publish(note("events", ChangeKind::Insert));
        feed.publish(note("events", ChangeKind::Delete));

        assert_eq!(all.recv().await.map(|n| n.kind), Some(ChangeKind::Insert));
        assert_eq!(all.recv().await.map(|n| n.kind), Some(ChangeKind::Delete));
        assert_eq!(deletes.recv().await.map(|n| n.kind), Some(ChangeKind::Delete));
    }

    #[tokio::test]
    async fn unsubscribe_stops_forwarding() {
        let feed = LocalChangeFeed::default();
        let mut sub = feed.open("taglines", ChangeKind::All);
        assert_eq!(feed.active_subscriptions(), 1);

        sub.unsubscribe();
        assert!(sub.recv().await.is_none());

        for _ in 0..50 {
            if feed.active_subscriptions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[test]
    fn join_message_requests_postgres_changes() {
        let msg = join_message("realtime:public:events", "public", "events", ChangeKind::All, None, 7);
        assert_eq!(msg["event"], "phx_join");
        assert_eq!(msg["ref"], "7");
        assert_eq!(msg["payload"]["config"]["postgres_changes"][0]["event"], "*");
        assert_eq!(msg["payload"]["config"]["postgres_changes"][0]["table"], "events");
        assert!(msg["payload"].get("access_token").is_none());
    }

    #[test]
    fn join_message_carries_user_token_when_signed_in() {
        let config = BackendConfig {
            url: "https://demo.supabase.co".to_string(),
            anon_key: "anon".to_string(),
            access_token: Some("user-jwt".to_string()),
            ..BackendConfig::default()
        };
        let realtime = PhoenixRealtime::new(&config).unwrap();
        let msg = join_message(
            &realtime.topic("rewards_transactions"),
            &realtime.schema,
            "rewards_transactions",
            ChangeKind::Insert,
            realtime.access_token.as_deref(),
            1,
        );
        assert_eq!(msg["topic"], "realtime:public:rewards_transactions");
        assert_eq!(msg["payload"]["access_token"], "user-jwt");
        assert_eq!(msg["payload"]["config"]["postgres_changes"][0]["event"], "INSERT");
    }

    #[test]
    fn parses_postgres_changes_frame() {
        let text = json!({
            "topic": "realtime:public:events",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "UPDATE",
                    "table": "events",
                    "record": {"id": "e1", "is_active": false},
                    "old_record": {"id": "e1"},
                    "commit_timestamp": "2024-06-01T10:00:00Z"
                }
            },
            "ref": null
        })
        .to_string();

        let frame = parse_frame(&text, "realtime:public:events", "events").unwrap();
        match frame {
            Frame::Change(n) => {
                assert_eq!(n.kind, ChangeKind::Update);
                assert_eq!(n.table, "events");
                assert_eq!(n.record.unwrap()["is_active"], json!(false));
                assert_eq!(n.commit_timestamp.as_deref(), Some("2024-06-01T10:00:00Z"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn parses_join_reply_and_foreign_topics() {
        let ok = json!({"topic": "realtime:public:events", "event": "phx_reply",
            "payload": {"status": "ok", "response": {}}, "ref": "1"})
        .to_string();
        assert_eq!(parse_frame(&ok, "realtime:public:events", "events").unwrap(), Frame::JoinOk);

        let rejected = json!({"topic": "realtime:public:events", "event": "phx_reply",
            "payload": {"status": "error", "response": {"reason": "unauthorized"}}, "ref": "1"})
        .to_string();
        assert_eq!(
            parse_frame(&rejected, "realtime:public:events", "events").unwrap(),
            Frame::JoinError("unauthorized".to_string())
        );

        let heartbeat = json!({"topic": "phoenix", "event": "phx_reply",
            "payload": {"status": "ok"}, "ref": "2"})
        .to_string();
        assert_eq!(parse_frame(&heartbeat, "realtime:public:events", "events").unwrap(), Frame::Ignored);
    }
}
