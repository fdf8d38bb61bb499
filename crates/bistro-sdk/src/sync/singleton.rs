//! 单行 Hook：联系方式、关于我们
//!
//! 读取最近更新的一行；`save` 有行则更新，无行则插入。

use serde::Serialize;
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::engine::{SyncCore, SyncHookHandle};
use super::hook::{list_query, to_object};
use super::state::{ListScope, SyncState};
use crate::backend::{BackendClient, Query};
use crate::entities::Entity;
use crate::error::{BistroSDKError, Result};
use crate::events::EventManager;

fn decode_first<E: Entity>(rows: Vec<Value>) -> Result<Option<E>> {
    rows.into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(BistroSDKError::from)
}

pub struct SingletonSyncHook<E: Entity> {
    core: Arc<SyncCore<Option<E>>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SingletonSyncHook<E> {
    pub fn new(client: BackendClient, scope: ListScope) -> Self {
        Self::with_events(client, scope, None)
    }

    pub fn with_events(client: BackendClient, scope: ListScope, events: Option<Arc<EventManager>>) -> Self {
        let query = list_query::<E>(scope, &[]).limit(1);
        Self {
            core: SyncCore::new(client, E::KIND, scope, query, decode_first::<E>, events),
            _entity: PhantomData,
        }
    }

    pub fn scope(&self) -> ListScope {
        self.core.scope()
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

    pub async fn refresh(&self) -> Result<usize> {
        self.core.fetch().await
    }

    pub fn snapshot(&self) -> SyncState<Option<E>> {
        self.core.snapshot()
    }

    pub fn data(&self) -> Option<E> {
        self.core.data()
    }

    pub fn watch(&self) -> watch::Receiver<SyncState<Option<E>>> {
        self.core.watch()
    }

    pub fn lifecycle_handle(&self) -> SyncHookHandle<Option<E>> {
        SyncHookHandle::new(&self.core)
    }

    /// 保存：已有记录则整体覆盖，否则插入新行
    pub async fn save(&self, draft: E::Draft) -> Result<E> {
        let result = self.write(&draft).await;
        match result {
            Ok(record) => {
                info!("💾 {} 已保存: {}", E::KIND, record.id());
                self.core.refetch_after_write("save").await;
                Ok(record)
            }
            Err(e) => Err(self.core.mutation_failed("save", e).await),
        }
    }

    async fn write(&self, draft: &E::Draft) -> Result<E> {
        E::validate_draft(draft)?;
        let row = to_object(draft, "保存内容")?;
        let current = match self.data() {
            Some(current) => Some(current),
            None => {
                self.core.fetch().await?;
                self.data()
            }
        };
        let tables = self.core.client().tables();
        match current {
            Some(current) => {
                let rows = tables
                    .update(E::KIND.table(), &Query::by_id(current.id()), row)
                    .await?;
                let row = rows
                    .into_iter()
                    .next()
                    .ok_or_else(|| BistroSDKError::NotFound(format!("{} {}", E::KIND, current.id())))?;
                Ok(serde_json::from_value(row)?)
            }
            None => Ok(serde_json::from_value(tables.insert(E::KIND.table(), row).await?)?),
        }
    }

    /// 局部更新当前记录
    pub async fn update(&self, patch: impl Serialize + Send) -> Result<E> {
        let result = self.patch_current(patch).await;
        match result {
            Ok(record) => {
                self.core.refetch_after_write("update").await;
                Ok(record)
            }
            Err(e) => Err(self.core.mutation_failed("update", e).await),
        }
    }

    async fn patch_current(&self, patch: impl Serialize) -> Result<E> {
        let patch = to_object(patch, "更新内容")?;
        let current = self
            .data()
            .ok_or_else(|| BistroSDKError::NotFound(format!("{} 尚无记录", E::KIND)))?;
        let rows = self
            .core
            .client()
            .tables()
            .update(E::KIND.table(), &Query::by_id(current.id()), patch)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BistroSDKError::NotFound(format!("{} {}", E::KIND, current.id())))?;
        Ok(serde_json::from_value(row)?)
    }

    /// 软删除当前记录
    pub async fn remove(&self) -> Result<()> {
        let result = self.patch_current(json!({ "is_active": false })).await;
        match result {
            Ok(_) => {
                self.core.refetch_after_write("remove").await;
                Ok(())
            }
            Err(e) => Err(self.core.mutation_failed("remove", e).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, ChangeKind, MemoryBackend};
    use crate::entities::{AboutUs, AboutUsDraft, ContactInfo, ContactInfoDraft};
    use std::time::Duration;
    use uuid::Uuid;

    fn contact(phone: &str, active: bool, updated_at: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "phone": phone,
            "is_active": active,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": updated_at,
        })
    }

    #[tokio::test]
    async fn picks_most_recently_updated_active_row() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(
            "contact_info",
            vec![
                contact("555-0100", true, "2024-01-01T00:00:00Z"),
                contact("555-0199", true, "2024-04-01T00:00:00Z"),
                contact("555-0000", false, "2024-06-01T00:00:00Z"),
            ],
        );
        let client = BackendClient::in_memory(backend);

        let visible = SingletonSyncHook::<ContactInfo>::new(client.clone(), ListScope::Visible);
        visible.refresh().await.unwrap();
        assert_eq!(visible.data().and_then(|c| c.phone).as_deref(), Some("555-0199"));

        let editor = SingletonSyncHook::<ContactInfo>::new(client, ListScope::Editor);
        editor.refresh().await.unwrap();
        assert_eq!(editor.data().and_then(|c| c.phone).as_deref(), Some("555-0000"));
    }

    #[tokio::test]
    async fn save_inserts_then_updates_same_row() {
        let backend = Arc::new(MemoryBackend::new());
        let hook = SingletonSyncHook::<AboutUs>::new(BackendClient::in_memory(backend.clone()), ListScope::Editor);

        let first = hook
            .save(AboutUsDraft {
                title: "Our story".to_string(),
                content: "Since 1998".to_string(),
                image_url: None,
                is_active: true,
            })
            .await
            .unwrap();
        let second = hook
            .save(AboutUsDraft {
                title: "Our story".to_string(),
                content: "Family owned since 1998".to_string(),
                image_url: None,
                is_active: true,
            })
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(backend.rows("about_us").len(), 1);
        assert_eq!(backend.call_count(BackendOp::Insert), 1);
        assert_eq!(hook.data().map(|a| a.content), Some("Family owned since 1998".to_string()));
    }

    #[tokio::test]
    async fn remove_soft_deletes_and_clears_visible_record() {
        let backend = Arc::new(MemoryBackend::new());
        let client = BackendClient::in_memory(backend.clone());
        let hook = SingletonSyncHook::<ContactInfo>::new(client, ListScope::Visible);
        hook.save(ContactInfoDraft {
            phone: Some("555-0123".to_string()),
            ..ContactInfoDraft::default()
        })
        .await
        .unwrap();
        assert!(hook.data().is_some());

        hook.remove().await.unwrap();
        assert!(hook.data().is_none());
        assert_eq!(backend.rows("contact_info").len(), 1);
        assert!(matches!(hook.remove().await, Err(BistroSDKError::NotFound(_))));
    }

    #[tokio::test]
    async fn change_notification_refreshes_singleton() {
        let backend = Arc::new(MemoryBackend::new());
        let hook = SingletonSyncHook::<ContactInfo>::new(BackendClient::in_memory(backend.clone()), ListScope::Visible);
        hook.activate().await.unwrap();
        let mut changes = hook.watch();

        backend.seed("contact_info", vec![contact("555-0111", true, "2024-02-01T00:00:00Z")]);
        backend.notify("contact_info", ChangeKind::All, None);

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                changes.changed().await.unwrap();
                if changes.borrow().data.is_some() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        hook.deactivate().await;
    }
}
