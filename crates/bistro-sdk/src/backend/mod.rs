//! 托管后端接入层
//!
//! 后端（行存储、实时变更流、对象存储、账号管理）全部由托管服务提供，SDK 只描述它的接口：
//! - [`TableApi`]：单表 select / insert / update / delete（带 filter / order / limit）
//! - [`RealtimeApi`]：按表订阅 insert / update / delete / 通配 变更通知
//! - [`ObjectStore`]：按 bucket + 文件名寻址的二进制对象
//! - [`AdminAuthApi`]：账号创建 / 删除、重置密码邮件
//!
//! [`BackendClient`] 把四者打包，显式构造后注入到每个同步 Hook，测试时换成 [`MemoryBackend`]。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::sdk::BistroConfig;

pub mod memory;
pub mod query;
pub mod realtime;
pub mod rest;

pub use memory::{BackendOp, MemoryBackend};
pub use query::{Direction, Filter, FilterOp, OrderBy, Query};
pub use realtime::{ChangeKind, ChangeNotification, ChangeSubscription, LocalChangeFeed, PhoenixRealtime};
pub use rest::RestBackend;

/// 单表读写接口（PostgREST 语义）
#[async_trait]
pub trait TableApi: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>>;

    /// 插入一行，返回服务端生成后的完整行
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// 按 filter 更新，返回更新后的行
    async fn update(&self, table: &str, filter: &Query, patch: Value) -> Result<Vec<Value>>;

    async fn delete(&self, table: &str, filter: &Query) -> Result<()>;
}

/// 实时变更订阅接口
#[async_trait]
pub trait RealtimeApi: Send + Sync {
    async fn subscribe(&self, table: &str, kind: ChangeKind) -> Result<ChangeSubscription>;
}

/// 对象存储接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, bucket: &str, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<()>;

    fn public_url(&self, bucket: &str, name: &str) -> String;
}

/// 账号管理接口（需要 service role 权限）
#[async_trait]
pub trait AdminAuthApi: Send + Sync {
    async fn create_user(&self, request: &CreateUserRequest) -> Result<AuthUser>;

    async fn delete_user(&self, user_id: Uuid) -> Result<()>;

    async fn send_password_reset(&self, email: &str) -> Result<()>;
}

/// 创建账号请求
#[derive(Debug, Clone, Serialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    /// 直接标记邮箱已验证，员工无需走确认邮件
    pub email_confirm: bool,
    pub user_metadata: Value,
}

/// 账号（auth identity）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

/// 注入到各 Hook 的后端客户端
#[derive(Clone)]
pub struct BackendClient {
    tables: Arc<dyn TableApi>,
    realtime: Arc<dyn RealtimeApi>,
    storage: Arc<dyn ObjectStore>,
    auth: Arc<dyn AdminAuthApi>,
}

impl BackendClient {
    pub fn new(
        tables: Arc<dyn TableApi>,
        realtime: Arc<dyn RealtimeApi>,
        storage: Arc<dyn ObjectStore>,
        auth: Arc<dyn AdminAuthApi>,
    ) -> Self {
        Self {
            tables,
            realtime,
            storage,
            auth,
        }
    }

    /// 全部接口由同一个内存后端提供
    pub fn in_memory(backend: Arc<MemoryBackend>) -> Self {
        Self::new(backend.clone(), backend.clone(), backend.clone(), backend)
    }

    /// 连接托管服务：REST 走 reqwest，实时变更走 Phoenix WebSocket
    pub fn remote(config: &BistroConfig) -> Result<Self> {
        let rest = Arc::new(RestBackend::new(&config.backend, &config.http_client_config)?);
        let realtime = Arc::new(PhoenixRealtime::new(&config.backend)?);
        Ok(Self::new(rest.clone(), realtime, rest.clone(), rest))
    }

    pub fn tables(&self) -> &dyn TableApi {
        self.tables.as_ref()
    }

    pub fn realtime(&self) -> &dyn RealtimeApi {
        self.realtime.as_ref()
    }

    pub fn storage(&self) -> &dyn ObjectStore {
        self.storage.as_ref()
    }

    pub fn auth(&self) -> &dyn AdminAuthApi {
        self.auth.as_ref()
    }
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient").finish_non_exhaustive()
    }
}
