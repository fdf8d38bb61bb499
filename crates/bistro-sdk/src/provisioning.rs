//! 员工开通
//!
//! 两步写入，跨越账号系统与数据表两个子系统，无法放进同一个事务：
//! 1. 创建账号：固定初始密码，邮箱直接标记已验证，`username` / `full_name` 写入账号元数据
//! 2. 插入 `profiles` 行：主键为新账号 id，`must_change_password = true`
//!
//! 第 2 步失败时删除第 1 步创建的账号（只尝试一次，失败只记日志），无论补偿是否成功都返回错误。

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, LazyLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{BackendClient, CreateUserRequest, Query};
use crate::entities::{Entity, EmployeeProfile, EmployeeRole, EntityKind, NewEmployeeProfile};
use crate::error::{BistroSDKError, Result};
use crate::events::{event_builders, EventManager, SDKEvent};

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// 账号系统要求的最短密码长度
pub const MIN_PASSWORD_LEN: usize = 6;

/// 开通请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmployee {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: EmployeeRole,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl NewEmployee {
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(BistroSDKError::InvalidInput("用户名不能为空".to_string()));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(BistroSDKError::InvalidInput("用户名不能包含空白字符".to_string()));
        }
        if self.full_name.trim().is_empty() {
            return Err(BistroSDKError::InvalidInput("姓名不能为空".to_string()));
        }
        validate_email(&self.email)
    }
}

pub fn validate_email(email: &str) -> Result<()> {
    if EMAIL_PATTERN.is_match(email.trim()) {
        Ok(())
    } else {
        Err(BistroSDKError::InvalidInput(format!("邮箱格式不正确: {}", email)))
    }
}

/// 员工资料可修改字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmployeeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<EmployeeRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

pub struct EmployeeProvisioner {
    client: BackendClient,
    initial_password: String,
    events: Option<Arc<EventManager>>,
}

impl EmployeeProvisioner {
    pub fn new(client: BackendClient, initial_password: impl Into<String>) -> Result<Self> {
        let initial_password = initial_password.into();
        if initial_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BistroSDKError::Config(format!(
                "初始密码至少 {} 位",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(Self {
            client,
            initial_password,
            events: None,
        })
    }

    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    /// 开通员工：创建账号 + 写入资料
    pub async fn provision(&self, employee: NewEmployee) -> Result<EmployeeProfile> {
        employee.validate()?;
        let email = employee.email.trim().to_lowercase();

        let request = CreateUserRequest {
            email: email.clone(),
            password: self.initial_password.clone(),
            email_confirm: true,
            user_metadata: json!({
                "username": employee.username,
                "full_name": employee.full_name,
            }),
        };
        let user = self.client.auth().create_user(&request).await.map_err(|e| {
            error!("❌ 创建员工账号失败 ({}): {}", email, e);
            BistroSDKError::Provisioning(format!("创建账号失败: {}", e.user_message()))
        })?;
        info!("👤 员工账号已创建: {} ({})", user.id, email);

        let profile = NewEmployeeProfile {
            id: user.id,
            username: employee.username.clone(),
            full_name: employee.full_name.clone(),
            email: Some(email),
            role: employee.role,
            job_title: employee.job_title,
            phone: employee.phone,
            is_active: true,
            must_change_password: true,
        };

        match self.insert_profile(&profile).await {
            Ok(created) => {
                info!("✅ 员工开通完成: {} ({})", created.username, created.id);
                self.emit(event_builders::employee_provisioned(created.id, &created.username))
                    .await;
                Ok(created)
            }
            Err(e) => {
                warn!("⚠️ 写入员工资料失败，删除已创建账号 {}: {}", user.id, e);
                let compensated = match self.client.auth().delete_user(user.id).await {
                    Ok(()) => true,
                    Err(delete_error) => {
                        error!("❌ 补偿删除账号 {} 失败: {}", user.id, delete_error);
                        false
                    }
                };
                self.emit(event_builders::provisioning_rolled_back(
                    user.id,
                    compensated,
                    e.user_message(),
                ))
                .await;
                Err(BistroSDKError::Provisioning(format!(
                    "写入员工资料失败: {}",
                    e.user_message()
                )))
            }
        }
    }

    async fn insert_profile(&self, profile: &NewEmployeeProfile) -> Result<EmployeeProfile> {
        EmployeeProfile::validate_draft(profile)?;
        let row = serde_json::to_value(profile)?;
        let inserted = self
            .client
            .tables()
            .insert(EntityKind::Employee.table(), row)
            .await?;
        Ok(serde_json::from_value(inserted)?)
    }

    pub async fn update_profile(&self, id: Uuid, update: &EmployeeUpdate) -> Result<EmployeeProfile> {
        if let Some(name) = &update.full_name {
            if name.trim().is_empty() {
                return Err(BistroSDKError::InvalidInput("姓名不能为空".to_string()));
            }
        }
        self.patch(id, serde_json::to_value(update)?).await
    }

    /// 停用员工（软删除，账号保留）
    pub async fn deactivate(&self, id: Uuid) -> Result<EmployeeProfile> {
        info!("⏸️ 停用员工: {}", id);
        self.patch(id, json!({ "is_active": false })).await
    }

    pub async fn reactivate(&self, id: Uuid) -> Result<EmployeeProfile> {
        info!("▶️ 恢复员工: {}", id);
        self.patch(id, json!({ "is_active": true })).await
    }

    /// 触发重置密码邮件
    pub async fn send_password_reset(&self, email: &str) -> Result<()> {
        validate_email(email)?;
        self.client
            .auth()
            .send_password_reset(email.trim())
            .await
            .map_err(|e| {
                error!("❌ 发送重置密码邮件失败 ({}): {}", email, e);
                e
            })
    }

    async fn patch(&self, id: Uuid, patch: serde_json::Value) -> Result<EmployeeProfile> {
        let rows = self
            .client
            .tables()
            .update(EntityKind::Employee.table(), &Query::by_id(id), patch)
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| BistroSDKError::NotFound(format!("employee {}", id)))?;
        Ok(serde_json::from_value(row)?)
    }

    async fn emit(&self, event: SDKEvent) {
        if let Some(events) = &self.events {
            events.emit(event).await;
        }
    }
}
