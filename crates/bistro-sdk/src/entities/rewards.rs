//! 积分流水（正数为获得，负数为兑换）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::require_text;
use super::{default_true, Entity, EntityKind};
use crate::backend::OrderBy;
use crate::error::{BistroSDKError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTransaction {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub points: i32,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRewardTransaction {
    pub customer_id: Uuid,
    pub points: i32,
    pub description: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Entity for RewardTransaction {
    const KIND: EntityKind = EntityKind::Reward;
    type Draft = NewRewardTransaction;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn ordering() -> Vec<OrderBy> {
        vec![OrderBy::desc("created_at")]
    }

    fn validate_draft(draft: &NewRewardTransaction) -> Result<()> {
        if draft.points == 0 {
            return Err(BistroSDKError::InvalidInput("积分变动不能为 0".to_string()));
        }
        require_text("积分说明", &draft.description)
    }
}
