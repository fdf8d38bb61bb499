//! 列表 Hook：一张表 ↔ 一个有序列表

use serde::Serialize;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{SyncCore, SyncHookHandle};
use super::state::{ListScope, SyncState};
use crate::backend::{BackendClient, Filter, Query};
use crate::entities::{DeleteStrategy, Entity, EntityKind};
use crate::error::{BistroSDKError, Result};
use crate::events::EventManager;

/// 列表 Hook 的构造选项
#[derive(Clone, Default)]
pub struct HookOptions {
    pub scope: Option<ListScope>,
    /// 附加的等值过滤（例如按顾客过滤积分流水）
    pub filters: Vec<Filter>,
    pub events: Option<Arc<EventManager>>,
}

impl HookOptions {
    pub fn new(scope: ListScope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }
}

pub(crate) fn list_query<E: Entity>(scope: ListScope, filters: &[Filter]) -> Query {
    let mut query = Query::new();
    if scope.active_only() {
        query = query.eq("is_active", true);
    }
    for filter in filters {
        query = query.filter(filter.column.clone(), filter.op, filter.value.clone());
    }
    query.ordered(E::ordering())
}

fn decode_rows<E: Entity>(rows: Vec<Value>) -> Result<Vec<E>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BistroSDKError::from))
        .collect()
}

pub(crate) fn to_object(value: impl Serialize, what: &str) -> Result<Value> {
    let value = serde_json::to_value(value)?;
    if !value.is_object() {
        return Err(BistroSDKError::InvalidInput(format!("{} 必须是 JSON 对象", what)));
    }
    Ok(value)
}

/// 实体列表同步 Hook
///
/// - `activate()`：订阅变更并拉取
/// - `add` / `update` / `remove` / `restore` / `reorder`：单次远端写入，成功后重新拉取
/// - `deactivate()`：取消订阅；之后返回的拉取结果被丢弃
///
/// 写操作返回 `Result`，失败不会修改本地状态。
pub struct EntitySyncHook<E: Entity> {
    core: Arc<SyncCore<Vec<E>>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntitySyncHook<E> {
    pub fn new(client: BackendClient, scope: ListScope) -> Self {
        Self::with_options(client, HookOptions::new(scope))
    }

    pub fn with_options(client: BackendClient, options: HookOptions) -> Self {
        let scope = options.scope.unwrap_or(ListScope::Visible);
        let query = list_query::<E>(scope, &options.filters);
        let core = SyncCore::new(client, E::KIND, scope, query, decode_rows::<E>, options.events);
        Self {
            core,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    pub fn scope(&self) -> ListScope {
        self.core.scope()
    }

    pub fn query(&self) -> &Query {
        self.core.query()
    }

    pub fn client(&self) -> &BackendClient {
        self.core.client()
    }

    pub async fn activate(&self) -> Result<()> {
        self.core.activate().await
    }

    pub async fn deactivate(&self) {
        self.core.deactivate().await
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// 是否持有活跃的变更订阅
    pub fn is_listening(&self) -> bool {
        self.core.is_listening()
    }

    /// 立即重新拉取，返回行数
    pub async fn refresh(&self) -> Result<usize> {
        self.core.fetch().await
    }

    pub fn snapshot(&self) -> SyncState<Vec<E>> {
        self.core.snapshot()
    }

    pub fn data(&self) -> Vec<E> {
        self.core.data()
    }

    pub fn find(&self, id: Uuid) -> Option<E> {
        self.core.data().into_iter().find(|e| e.id() == id)
    }

    /// 订阅状态变化
    pub fn watch(&self) -> watch::Receiver<SyncState<Vec<E>>> {
        self.core.watch()
    }

    pub fn lifecycle_handle(&self) -> SyncHookHandle<Vec<E>> {
        SyncHookHandle::new(&self.core)
    }

    /// 插入一行，返回服务端生成的完整记录
    pub async fn add(&self, draft: E::Draft) -> Result<E> {
        let result = self.insert_row(&draft).await;
        match result {
            Ok(record) => {
                info!("➕ {} 新增: {}", E::KIND, record.id());
                self.core.refetch_after_write("add").await;
                Ok(record)
            }
            Err(e) => Err(self.core.mutation_failed("add", e).await),
        }
    }

    async fn insert_row(&self, draft: &E::Draft) -> Result<E> {
        E::validate_draft(draft)?;
        let row = to_object(draft, "新增内容")?;
        let inserted = self.client().tables().insert(E::KIND.table(), row).await?;
        Ok(serde_json::from_value(inserted)?)
    }

    /// 按 id 局部更新
    pub async fn update(&self, id: Uuid, patch: impl Serialize + Send) -> Result<E> {
        let result = match to_object(patch, "更新内容") {
            Ok(patch) => self.update_row(id, patch).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(record) => {
                debug!("✏️ {} 更新: {}", E::KIND, id);
                self.core.refetch_after_write("update").await;
                Ok(record)
            }
            Err(e) => Err(self.core.mutation_failed("update", e).await),
        }
    }

    async fn update_row(&self, id: Uuid, patch: Value) -> Result<E> {
        let rows = self
            .client()
            .tables()
            .update(E::KIND.table(), &Query::by_id(id), patch)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BistroSDKError::NotFound(format!("{} {}", E::KIND, id)))?;
        Ok(serde_json::from_value(row)?)
    }

    /// 删除：普通实体置 `is_active = false`；相册 / 指南先删存储对象再删行
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let result = match E::KIND.delete_strategy() {
            DeleteStrategy::SoftDelete => self
                .update_row(id, json!({ "is_active": false }))
                .await
                .map(|_| ()),
            DeleteStrategy::PurgeWithObject => self.purge(id).await,
        };
        match result {
            Ok(()) => {
                info!("🗑️ {} 删除: {}", E::KIND, id);
                self.core.refetch_after_write("remove").await;
                Ok(())
            }
            Err(e) => Err(self.core.mutation_failed("remove", e).await),
        }
    }

    async fn purge(&self, id: Uuid) -> Result<()> {
        let record = match self.find(id) {
            Some(record) => Some(record),
            None => self.load_one(id).await?,
        };
        let record = record.ok_or_else(|| BistroSDKError::NotFound(format!("{} {}", E::KIND, id)))?;

        if let (Some(bucket), Some(object)) = (E::KIND.bucket(), record.object_name()) {
            // 存储删除失败不阻塞行删除
            if let Err(e) = crate::media::purge_object(self.client(), bucket, object).await {
                warn!("⚠️ 删除存储对象 {}/{} 失败，继续删除行: {}", bucket, object, e);
            }
        }

        self.client()
            .tables()
            .delete(E::KIND.table(), &Query::by_id(id))
            .await
    }

    async fn load_one(&self, id: Uuid) -> Result<Option<E>> {
        let rows = self
            .client()
            .tables()
            .select(E::KIND.table(), &Query::by_id(id).limit(1))
            .await?;
        rows.into_iter()
            .next()
            .map(serde_json::from_value)
            .transpose()
            .map_err(BistroSDKError::from)
    }

    /// 恢复软删除的行（仅对软删除实体有意义）
    pub async fn restore(&self, id: Uuid) -> Result<E> {
        let result = match E::KIND.delete_strategy() {
            DeleteStrategy::SoftDelete => self.update_row(id, json!({ "is_active": true })).await,
            DeleteStrategy::PurgeWithObject => Err(BistroSDKError::InvalidInput(format!(
                "{} 删除后不可恢复",
                E::KIND
            ))),
        };
        match result {
            Ok(record) => {
                self.core.refetch_after_write("restore").await;
                Ok(record)
            }
            Err(e) => Err(self.core.mutation_failed("restore", e).await),
        }
    }

    /// 按给定顺序重写 `display_order`（从 0 开始），全部写完后只刷新一次
    ///
    /// 中途失败时已写入的行不回滚；只要写入过至少一行就重新拉取，再返回错误。
    pub async fn reorder(&self, ids: &[Uuid]) -> Result<()> {
        let mut written = 0usize;
        let result = self.write_order(ids, &mut written).await;
        match result {
            Ok(()) => {
                debug!("↕️ {} 重新排序: {} 行", E::KIND, ids.len());
                self.core.refetch_after_write("reorder").await;
                Ok(())
            }
            Err(e) => {
                if written > 0 {
                    warn!("⚠️ {} 重新排序在第 {} 行后失败", E::KIND, written);
                    self.core.refetch_after_write("reorder").await;
                }
                Err(self.core.mutation_failed("reorder", e).await)
            }
        }
    }

    async fn write_order(&self, ids: &[Uuid], written: &mut usize) -> Result<()> {
        if !E::KIND.has_display_order() {
            return Err(BistroSDKError::InvalidInput(format!("{} 不支持手动排序", E::KIND)));
        }
        for (index, id) in ids.iter().enumerate() {
            self.update_row(*id, json!({ "display_order": index })).await?;
            *written += 1;
        }
        Ok(())
    }
}
