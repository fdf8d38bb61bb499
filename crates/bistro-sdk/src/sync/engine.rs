//! 同步核心：拉取 + 订阅 + 拆除保护
//!
//! 列表 Hook 与单行 Hook 共用。每次拉取开始时记下当前 epoch，`activate` / `deactivate`
//! 都会推进 epoch；结果返回时 epoch 已变化则直接丢弃，不再写状态。
//! `activate` 的首次拉取绑定激活时的 epoch，订阅建立期间被拆除则不再拉取。
//!
//! 订阅在未被取消的情况下结束（连接断开、频道被关闭）时，错误写入状态，
//! Hook 仍保持激活，再次调用 `activate()` 会重新订阅。
//!
//! ## NOTE: 不做增量
//!
//! 任何变更通知、任何写操作成功后都重新执行同一条查询，整体替换本地数据。
//! 并发触发的拉取不去重，最后返回的结果生效（查询相同，结果收敛）。

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{ListScope, SyncState};
use crate::backend::{BackendClient, ChangeKind, ChangeSubscription, Query};
use crate::entities::EntityKind;
use crate::error::{BistroSDKError, Result};
use crate::events::{event_builders, EventManager, SDKEvent};
use crate::lifecycle::LifecycleHook;

/// 查询结果 -> Hook 数据
pub(crate) type Decoder<T> = fn(Vec<Value>) -> Result<T>;

/// 订阅意外结束时写入状态的错误文案
pub(crate) const SUBSCRIPTION_LOST: &str = "实时订阅已断开，数据可能不是最新";

struct Listener {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

pub(crate) struct SyncCore<T> {
    client: BackendClient,
    kind: EntityKind,
    scope: ListScope,
    query: Query,
    decode: Decoder<T>,
    state: watch::Sender<SyncState<T>>,
    epoch: AtomicU64,
    active: AtomicBool,
    in_flight: AtomicUsize,
    /// 因切到后台而停用，回到前台时需要重新激活
    resume_on_foreground: AtomicBool,
    listener: Mutex<Option<Listener>>,
    next_listener: AtomicU64,
    /// 订阅意外结束且尚未重新订阅
    subscription_lost: AtomicBool,
    events: Option<Arc<EventManager>>,
}

impl<T> SyncCore<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    pub(crate) fn new(
        client: BackendClient,
        kind: EntityKind,
        scope: ListScope,
        query: Query,
        decode: Decoder<T>,
        events: Option<Arc<EventManager>>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SyncState::default());
        Arc::new(Self {
            client,
            kind,
            scope,
            query,
            decode,
            state,
            epoch: AtomicU64::new(0),
            active: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            resume_on_foreground: AtomicBool::new(false),
            listener: Mutex::new(None),
            next_listener: AtomicU64::new(1),
            subscription_lost: AtomicBool::new(false),
            events,
        })
    }

    pub(crate) fn client(&self) -> &BackendClient {
        &self.client
    }

    pub(crate) fn kind(&self) -> EntityKind {
        self.kind
    }

    pub(crate) fn scope(&self) -> ListScope {
        self.scope
    }

    pub(crate) fn query(&self) -> &Query {
        &self.query
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map(Listener::is_alive)
            .unwrap_or(false)
    }

    pub(crate) fn snapshot(&self) -> SyncState<T> {
        self.state.borrow().clone()
    }

    pub(crate) fn data(&self) -> T {
        self.state.borrow().data.clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SyncState<T>> {
        self.state.subscribe()
    }

    /// 激活：订阅整表变更，然后执行首次拉取
    ///
    /// 订阅失败时仍会拉取一次数据，并返回订阅错误。
    /// 已激活但订阅已断开时重新订阅并拉取。
    pub(crate) async fn activate(self: &Arc<Self>) -> Result<()> {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if was_active && self.is_listening() {
            debug!("{} Hook 已激活，跳过", self.kind);
            return Ok(());
        }
        if !was_active {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            info!("🔄 激活 {} 同步 (scope={})", self.kind, self.scope.as_str());
        }
        let epoch = self.epoch.load(Ordering::SeqCst);

        let subscribed = self
            .client
            .realtime()
            .subscribe(self.kind.table(), ChangeKind::All)
            .await;

        if !self.is_current(epoch) {
            // 订阅建立期间已被拆除
            if let Ok(subscription) = subscribed {
                subscription.unsubscribe();
            }
            debug!("{} 激活期间被拆除，放弃首次拉取", self.kind);
            return Ok(());
        }

        let subscribed = match subscribed {
            Ok(subscription) => {
                if self.spawn_listener(subscription) {
                    self.emit(event_builders::subscription_changed(self.kind.as_str(), true))
                        .await;
                }
                Ok(())
            }
            Err(e) => {
                warn!("⚠️ 订阅 {} 变更失败: {}", self.kind.table(), e);
                Err(e)
            }
        };

        let fetched = self.fetch_at(epoch).await.map(|_| ());
        subscribed.and(fetched)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.is_active() && self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// 启动监听任务；已有存活的监听时丢弃新订阅并返回 false
    fn spawn_listener(self: &Arc<Self>, mut subscription: ChangeSubscription) -> bool {
        let mut slot = self.listener.lock();
        if slot.as_ref().is_some_and(Listener::is_alive) {
            subscription.unsubscribe();
            return false;
        }
        if let Some(stale) = slot.take() {
            stale.cancel.cancel();
        }

        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let cancel = subscription.cancel_token();
        let weak: Weak<Self> = Arc::downgrade(self);
        let table = self.kind.table();
        let task = tokio::spawn(async move {
            while let Some(note) = subscription.recv().await {
                let Some(core) = weak.upgrade() else { return };
                core.on_change(note.kind).await;
            }
            if subscription.is_cancelled() {
                debug!("变更监听结束: {}", table);
                return;
            }
            if let Some(core) = weak.upgrade() {
                core.on_subscription_lost(id).await;
            }
        });

        *slot = Some(Listener { id, cancel, task });
        self.subscription_lost.store(false, Ordering::SeqCst);
        true
    }

    async fn on_subscription_lost(&self, id: u64) {
        let lost = {
            let mut slot = self.listener.lock();
            if slot.as_ref().map(|l| l.id) == Some(id) {
                slot.take()
            } else {
                None
            }
        };
        if lost.is_none() {
            return;
        }

        warn!("⚠️ {} 实时订阅意外结束", self.kind);
        self.subscription_lost.store(true, Ordering::SeqCst);
        self.emit(event_builders::subscription_changed(self.kind.as_str(), false))
            .await;
        self.state.send_modify(|s| s.error = Some(SUBSCRIPTION_LOST.to_string()));
    }

    async fn on_change(&self, kind: ChangeKind) {
        debug!("📥 {} 收到 {} 变更，重新拉取", self.kind, kind.as_str());
        self.emit(event_builders::change_received(self.kind.as_str(), kind))
            .await;
        // 失败已记录在状态里
        let _ = self.fetch().await;
    }

    /// 拆除：取消订阅，丢弃所有进行中的拉取结果
    pub(crate) async fn deactivate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let had_listener = self.cancel_listener();
        self.subscription_lost.store(false, Ordering::SeqCst);
        self.state.send_if_modified(|s| std::mem::replace(&mut s.loading, false));
        info!("⏹️ 停用 {} 同步 (scope={})", self.kind, self.scope.as_str());
        if had_listener {
            self.emit(event_builders::subscription_changed(self.kind.as_str(), false))
                .await;
        }
    }

    fn cancel_listener(&self) -> bool {
        match self.listener.lock().take() {
            Some(listener) => {
                listener.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// 执行查询并替换本地数据，返回行数
    ///
    /// 失败时写入错误信息，保留旧数据。
    pub(crate) async fn fetch(&self) -> Result<usize> {
        self.fetch_at(self.epoch.load(Ordering::SeqCst)).await
    }

    /// 以给定 epoch 拉取；epoch 已过期时不写状态
    async fn fetch_at(&self, epoch: u64) -> Result<usize> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.state
            .send_if_modified(|s| !std::mem::replace(&mut s.loading, true));

        let result = self
            .client
            .tables()
            .select(self.kind.table(), &self.query)
            .await
            .and_then(|rows| {
                let count = rows.len();
                (self.decode)(rows).map(|data| (data, count))
            });
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("丢弃过期的 {} 拉取结果", self.kind);
            if remaining == 0 {
                self.state
                    .send_if_modified(|s| std::mem::replace(&mut s.loading, false));
            }
            return result.map(|(_, count)| count);
        }

        match result {
            Ok((data, count)) => {
                let lost = self.subscription_lost.load(Ordering::SeqCst);
                self.state.send_modify(|s| {
                    s.data = data;
                    s.error = lost.then(|| SUBSCRIPTION_LOST.to_string());
                    s.loading = remaining > 0;
                    s.last_synced_at = Some(Utc::now());
                });
                debug!("✅ {} 拉取完成: {} 行", self.kind, count);
                self.emit(event_builders::entity_refreshed(self.kind.as_str(), self.scope, count))
                    .await;
                Ok(count)
            }
            Err(e) => {
                let message = e.user_message();
                self.state.send_modify(|s| {
                    s.error = Some(message.clone());
                    s.loading = remaining > 0;
                });
                error!("❌ {} 拉取失败: {}", self.kind, e);
                self.emit(event_builders::entity_fetch_failed(self.kind.as_str(), message))
                    .await;
                Err(e)
            }
        }
    }

    /// 写操作成功后的统一刷新；刷新失败只体现在状态里
    pub(crate) async fn refetch_after_write(&self, operation: &str) {
        if let Err(e) = self.fetch().await {
            warn!("⚠️ {} {} 成功但刷新失败: {}", self.kind, operation, e);
        }
    }

    /// 记录写操作失败并原样返回错误
    pub(crate) async fn mutation_failed(&self, operation: &str, error: BistroSDKError) -> BistroSDKError {
        error!("❌ {} {} 失败: {}", self.kind, operation, error);
        self.emit(event_builders::mutation_failed(
            self.kind.as_str(),
            operation,
            error.user_message(),
        ))
        .await;
        error
    }

    async fn emit(&self, event: SDKEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }
}

impl<T> Drop for SyncCore<T> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
        }
    }
}

/// 注册到 [`crate::lifecycle::LifecycleManager`] 的句柄
///
/// 只持有弱引用，Hook 释放后句柄自动失效。
pub struct SyncHookHandle<T> {
    core: Weak<SyncCore<T>>,
    name: String,
}

impl<T> SyncHookHandle<T> {
    pub(crate) fn new(core: &Arc<SyncCore<T>>) -> Self {
        Self {
            core: Arc::downgrade(core),
            name: format!("{}:{}", core.kind, core.scope.as_str()),
        }
    }

    /// Hook 是否仍然存活
    pub fn is_alive(&self) -> bool {
        self.core.strong_count() > 0
    }
}

#[async_trait]
impl<T> LifecycleHook for SyncHookHandle<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_background(&self) -> Result<()> {
        let Some(core) = self.core.upgrade() else {
            return Ok(());
        };
        if core.is_active() {
            core.resume_on_foreground.store(true, Ordering::SeqCst);
            core.deactivate().await;
        }
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        let Some(core) = self.core.upgrade() else {
            return Ok(());
        };
        if core.resume_on_foreground.swap(false, Ordering::SeqCst) {
            core.activate().await?;
        }
        Ok(())
    }
}
