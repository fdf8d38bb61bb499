//! 顾客积分
//!
//! 积分余额不单独存储，由 `rewards_transactions` 中该顾客的有效流水求和得到。

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::backend::{BackendClient, Filter};
use crate::entities::{NewRewardTransaction, RewardTransaction};
use crate::error::{BistroSDKError, Result};
use crate::events::EventManager;
use crate::sync::{EntitySyncHook, HookOptions, ListScope, SyncHookHandle};

/// 有效流水的积分合计
pub fn balance_of(transactions: &[RewardTransaction]) -> i64 {
    transactions
        .iter()
        .filter(|t| t.is_active)
        .map(|t| i64::from(t.points))
        .sum()
}

/// 单个顾客的积分账本
pub struct RewardsLedger {
    customer_id: Uuid,
    hook: EntitySyncHook<RewardTransaction>,
}

impl RewardsLedger {
    pub fn new(client: BackendClient, customer_id: Uuid, events: Option<Arc<EventManager>>) -> Self {
        let mut options = HookOptions::new(ListScope::Visible).filter(Filter::eq("customer_id", customer_id.to_string()));
        options.events = events;
        Self {
            customer_id,
            hook: EntitySyncHook::with_options(client, options),
        }
    }

    pub fn customer_id(&self) -> Uuid {
        self.customer_id
    }

    pub async fn activate(&self) -> Result<()> {
        self.hook.activate().await
    }

    pub async fn deactivate(&self) {
        self.hook.deactivate().await
    }

    pub async fn refresh(&self) -> Result<usize> {
        self.hook.refresh().await
    }

    /// 按时间倒序的流水
    pub fn transactions(&self) -> Vec<RewardTransaction> {
        self.hook.data()
    }

    pub fn balance(&self) -> i64 {
        balance_of(&self.hook.data())
    }

    pub fn hook(&self) -> &EntitySyncHook<RewardTransaction> {
        &self.hook
    }

    pub fn lifecycle_handle(&self) -> SyncHookHandle<Vec<RewardTransaction>> {
        self.hook.lifecycle_handle()
    }

    /// 增加积分
    pub async fn award(&self, points: u32, description: &str) -> Result<RewardTransaction> {
        let points = to_points(points)?;
        let entry = self
            .hook
            .add(NewRewardTransaction {
                customer_id: self.customer_id,
                points,
                description: description.to_string(),
                is_active: true,
            })
            .await?;
        info!("🎁 顾客 {} 获得 {} 积分", self.customer_id, points);
        Ok(entry)
    }

    /// 兑换积分；先按服务端数据刷新余额，余额不足时拒绝
    pub async fn redeem(&self, points: u32, description: &str) -> Result<RewardTransaction> {
        let points = to_points(points)?;
        self.hook.refresh().await?;
        let balance = self.balance();
        if balance < i64::from(points) {
            return Err(BistroSDKError::InvalidInput(format!(
                "积分不足：当前 {}，需要 {}",
                balance, points
            )));
        }

        let entry = self
            .hook
            .add(NewRewardTransaction {
                customer_id: self.customer_id,
                points: -points,
                description: description.to_string(),
                is_active: true,
            })
            .await?;
        info!("🧾 顾客 {} 兑换 {} 积分", self.customer_id, points);
        Ok(entry)
    }
}

fn to_points(points: u32) -> Result<i32> {
    if points == 0 {
        return Err(BistroSDKError::InvalidInput("积分必须大于 0".to_string()));
    }
    i32::try_from(points).map_err(|_| BistroSDKError::InvalidInput(format!("积分过大: {}", points)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, MemoryBackend};
    use serde_json::json;

    #[tokio::test]
    async fn ledger_is_scoped_to_one_customer() {
        let backend = Arc::new(MemoryBackend::new());
        let customer = Uuid::new_v4();
        backend.seed(
            "rewards_transactions",
            vec![
                json!({"customer_id": customer, "points": 50, "description": "Signup", "is_active": true}),
                json!({"customer_id": Uuid::new_v4(), "points": 500, "description": "Other", "is_active": true}),
                json!({"customer_id": customer, "points": 20, "description": "Voided", "is_active": false}),
            ],
        );
        let ledger = RewardsLedger::new(BackendClient::in_memory(backend), customer, None);

        ledger.refresh().await.unwrap();
        assert_eq!(ledger.transactions().len(), 1);
        assert_eq!(ledger.balance(), 50);
    }

    #[tokio::test]
    async fn award_then_redeem_updates_balance() {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = RewardsLedger::new(BackendClient::in_memory(backend.clone()), Uuid::new_v4(), None);

        ledger.award(120, "Dinner for two").await.unwrap();
        ledger.redeem(100, "Free dessert").await.unwrap();

        assert_eq!(ledger.balance(), 20);
        assert_eq!(backend.rows("rewards_transactions").len(), 2);
    }

    #[tokio::test]
    async fn redeem_beyond_balance_is_rejected_without_write() {
        let backend = Arc::new(MemoryBackend::new());
        let ledger = RewardsLedger::new(BackendClient::in_memory(backend.clone()), Uuid::new_v4(), None);
        ledger.award(10, "Coffee").await.unwrap();

        let err = ledger.redeem(11, "Pie").await.unwrap_err();
        assert!(matches!(err, BistroSDKError::InvalidInput(_)));
        assert_eq!(backend.call_count(BackendOp::Insert), 1);
        assert!(ledger.award(0, "nothing").await.is_err());
    }
}
