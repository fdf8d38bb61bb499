//! 员工资料（`profiles` 表，主键与账号 id 相同）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::require_text;
use super::{Entity, EntityKind};
use crate::backend::OrderBy;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeRole {
    Admin,
    Manager,
    Staff,
}

impl EmployeeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Staff => "staff",
        }
    }

    /// 是否可以管理内容与员工
    pub fn can_manage(self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: EmployeeRole,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub is_active: bool,
    /// 首次登录必须修改初始密码
    #[serde(default)]
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 由开通流程写入，`id` 为新账号 id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmployeeProfile {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: EmployeeRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub is_active: bool,
    pub must_change_password: bool,
}

impl Entity for EmployeeProfile {
    const KIND: EntityKind = EntityKind::Employee;
    type Draft = NewEmployeeProfile;

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn ordering() -> Vec<OrderBy> {
        vec![OrderBy::asc("full_name")]
    }

    fn validate_draft(draft: &NewEmployeeProfile) -> Result<()> {
        require_text("用户名", &draft.username)?;
        require_text("姓名", &draft.full_name)
    }
}
