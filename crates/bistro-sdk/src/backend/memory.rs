//! 内存后端 - 测试替身 / 离线演示
//!
//! 与托管服务保持相同的可观察语义：
//! - insert 自动补 `id` / `created_at` / `updated_at`
//! - 每次写操作后在本地变更流上发布通知
//! - 查询走同一个 [`Query`] 求值（过滤、排序、limit）
//!
//! 额外提供故障注入（`fail_next`）、调用计数（`call_count`）和查询延迟（`set_select_delay`）。

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::realtime::{ChangeKind, ChangeNotification, ChangeSubscription, LocalChangeFeed};
use super::{AdminAuthApi, AuthUser, CreateUserRequest, ObjectStore, Query, RealtimeApi, TableApi};
use crate::error::{BistroSDKError, Result};

/// 可注入故障 / 可计数的后端操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Select,
    Insert,
    Update,
    Delete,
    Upload,
    RemoveObject,
    CreateUser,
    DeleteUser,
    PasswordReset,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
    users: RwLock<HashMap<Uuid, AuthUser>>,
    feed: LocalChangeFeed,
    failures: Mutex<HashMap<BackendOp, u32>>,
    calls: Mutex<HashMap<BackendOp, usize>>,
    select_delay: Mutex<Option<Duration>>,
    reset_requests: Mutex<Vec<String>>,
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入行（不发布变更通知）
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.write();
        let entry = tables.entry(table.to_string()).or_default();
        for row in rows {
            entry.push(Self::with_defaults(row));
        }
    }

    /// 当前表内容（未排序）
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// 模拟一条来自服务端的变更通知（不修改数据）
    pub fn notify(&self, table: &str, kind: ChangeKind, record: Option<Value>) {
        self.feed.publish(ChangeNotification {
            table: table.to_string(),
            kind,
            record,
            old_record: None,
            commit_timestamp: Some(now_string()),
        });
    }

    /// 下 `times` 次 `op` 调用返回错误
    pub fn fail_next(&self, op: BackendOp, times: u32) {
        self.failures.lock().insert(op, times);
    }

    pub fn call_count(&self, op: BackendOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// 每次 select 之前等待（用于模拟慢查询）
    pub fn set_select_delay(&self, delay: Option<Duration>) {
        *self.select_delay.lock() = delay;
    }

    pub fn change_feed(&self) -> &LocalChangeFeed {
        &self.feed
    }

    pub fn has_object(&self, bucket: &str, name: &str) -> bool {
        self.objects.read().contains_key(&(bucket.to_string(), name.to_string()))
    }

    pub fn user(&self, id: Uuid) -> Option<AuthUser> {
        self.users.read().get(&id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn password_reset_requests(&self) -> Vec<String> {
        self.reset_requests.lock().clone()
    }

    fn begin(&self, op: BackendOp) -> Result<()> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BistroSDKError::Http {
                    status: 500,
                    message: format!("injected {:?} failure", op),
                });
            }
        }
        Ok(())
    }

    fn with_defaults(row: Value) -> Value {
        let mut object = match row {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let now = now_string();
        object
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        object
            .entry("created_at")
            .or_insert_with(|| Value::String(now.clone()));
        object.entry("updated_at").or_insert_with(|| Value::String(now));
        Value::Object(object)
    }

    fn publish(&self, table: &str, kind: ChangeKind, record: Option<Value>, old_record: Option<Value>) {
        self.feed.publish(ChangeNotification {
            table: table.to_string(),
            kind,
            record,
            old_record,
            commit_timestamp: Some(now_string()),
        });
    }
}

#[async_trait]
impl TableApi for MemoryBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        self.begin(BackendOp::Select)?;
        let delay = *self.select_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let rows = self.rows(table);
        Ok(query.apply(rows))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        self.begin(BackendOp::Insert)?;
        if !row.is_object() {
            return Err(BistroSDKError::InvalidInput("insert 需要 JSON 对象".to_string()));
        }
        let row = Self::with_defaults(row);
        {
            let mut tables = self.tables.write();
            let entry = tables.entry(table.to_string()).or_default();
            let id = row.get("id").cloned();
            if entry.iter().any(|r| r.get("id") == id.as_ref()) {
                return Err(BistroSDKError::Http {
                    status: 409,
                    message: format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
                });
            }
            entry.push(row.clone());
        }
        debug!("memory insert: {}", table);
        self.publish(table, ChangeKind::Insert, Some(row.clone()), None);
        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Query, patch: Value) -> Result<Vec<Value>> {
        self.begin(BackendOp::Update)?;
        let Value::Object(patch) = patch else {
            return Err(BistroSDKError::InvalidInput("update 需要 JSON 对象".to_string()));
        };
        let mut changed = Vec::new();
        {
            let mut tables = self.tables.write();
            let now = now_string();
            if let Some(rows) = tables.get_mut(table) {
                for row in rows.iter_mut().filter(|r| filter.matches(r)) {
                    let old = row.clone();
                    if let Value::Object(fields) = row {
                        for (key, value) in &patch {
                            fields.insert(key.clone(), value.clone());
                        }
                        fields.insert("updated_at".to_string(), Value::String(now.clone()));
                    }
                    changed.push((old, row.clone()));
                }
            }
        }
        for (old, new) in &changed {
            self.publish(table, ChangeKind::Update, Some(new.clone()), Some(old.clone()));
        }
        Ok(changed.into_iter().map(|(_, new)| new).collect())
    }

    async fn delete(&self, table: &str, filter: &Query) -> Result<()> {
        self.begin(BackendOp::Delete)?;
        let removed: Vec<Value> = {
            let mut tables = self.tables.write();
            match tables.get_mut(table) {
                Some(rows) => {
                    let (gone, kept): (Vec<Value>, Vec<Value>) =
                        rows.drain(..).partition(|r| filter.matches(r));
                    *rows = kept;
                    gone
                }
                None => Vec::new(),
            }
        };
        for old in removed {
            self.publish(table, ChangeKind::Delete, None, Some(old));
        }
        Ok(())
    }
}

#[async_trait]
impl RealtimeApi for MemoryBackend {
    async fn subscribe(&self, table: &str, kind: ChangeKind) -> Result<ChangeSubscription> {
        Ok(self.feed.open(table, kind))
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(&self, bucket: &str, name: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.begin(BackendOp::Upload)?;
        self.objects
            .write()
            .insert((bucket.to_string(), name.to_string()), bytes);
        Ok(())
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<()> {
        self.begin(BackendOp::RemoveObject)?;
        let mut objects = self.objects.write();
        for name in names {
            objects.remove(&(bucket.to_string(), name.clone()));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("memory://{}/{}", bucket, name)
    }
}

#[async_trait]
impl AdminAuthApi for MemoryBackend {
    async fn create_user(&self, request: &CreateUserRequest) -> Result<AuthUser> {
        self.begin(BackendOp::CreateUser)?;
        let mut users = self.users.write();
        if users
            .values()
            .any(|u| u.email.as_deref() == Some(request.email.as_str()))
        {
            return Err(BistroSDKError::Http {
                status: 422,
                message: "A user with this email address has already been registered".to_string(),
            });
        }
        let user = AuthUser {
            id: Uuid::new_v4(),
            email: Some(request.email.clone()),
            user_metadata: request.user_metadata.clone(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        self.begin(BackendOp::DeleteUser)?;
        match self.users.write().remove(&user_id) {
            Some(_) => Ok(()),
            None => Err(BistroSDKError::NotFound(format!("user {}", user_id))),
        }
    }

    async fn send_password_reset(&self, email: &str) -> Result<()> {
        self.begin(BackendOp::PasswordReset)?;
        self.reset_requests.lock().push(email.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OrderBy;
    use serde_json::json;

    #[tokio::test]
    async fn insert_fills_generated_columns_and_notifies() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("taglines", ChangeKind::Insert).await.unwrap();

        let row = backend
            .insert("taglines", json!({"text": "Fresh daily", "is_active": true, "display_order": 0}))
            .await
            .unwrap();
        assert!(row["id"].is_string());
        assert!(row["created_at"].is_string());

        let note = sub.recv().await.unwrap();
        assert_eq!(note.kind, ChangeKind::Insert);
        assert_eq!(note.record.unwrap()["text"], "Fresh daily");
    }

    #[tokio::test]
    async fn update_and_delete_respect_filters() {
        let backend = MemoryBackend::new();
        backend.seed(
            "events",
            vec![
                json!({"id": "a", "title": "Jazz", "display_order": 1}),
                json!({"id": "b", "title": "Trivia", "display_order": 2}),
            ],
        );

        let updated = backend
            .update("events", &Query::by_id("a"), json!({"title": "Jazz Night"}))
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["title"], "Jazz Night");

        backend.delete("events", &Query::by_id("b")).await.unwrap();
        let rows = backend
            .select("events", &Query::new().order_by(OrderBy::asc("display_order")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "a");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let backend = MemoryBackend::new();
        backend.fail_next(BackendOp::Select, 1);

        assert!(backend.select("reviews", &Query::new()).await.is_err());
        assert!(backend.select("reviews", &Query::new()).await.is_ok());
        assert_eq!(backend.call_count(BackendOp::Select), 2);
    }
}
