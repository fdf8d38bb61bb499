//! Bistro SDK - 餐厅 App 数据访问层
//!
//! 本 SDK 为顾客端与员工端 App 提供：
//! - 🔄 实体同步 Hook：查询 + 变更订阅 + 写后重新拉取（公告、活动、评价、相册、指南……）
//! - 👤 员工开通：账号 + 资料两步写入，失败时补偿删除账号
//! - 🎁 积分账本：按顾客汇总积分流水
//! - 🌤️ 天气轮询：固定 30 分钟间隔
//! - ⚙️ 事件系统：刷新 / 失败 / 开通事件统一广播
//! - 📱 生命周期：切后台拆除订阅，回前台恢复并刷新
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use bistro_sdk::{BistroConfig, BistroSDK, ListScope};
//! use bistro_sdk::entities::Announcement;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BistroConfig::builder()
//!         .backend_url("https://xyz.supabase.co")
//!         .anon_key("public-anon-key")
//!         .build();
//!
//!     let sdk = BistroSDK::initialize(config).await?;
//!
//!     // 顾客端公告列表：只含有效行，按 display_order 排序
//!     let announcements = sdk.entity_hook::<Announcement>(ListScope::Visible);
//!     announcements.activate().await?;
//!     for item in announcements.data() {
//!         println!("{}", item.title);
//!     }
//!
//!     // 拆除时取消订阅
//!     announcements.deactivate().await;
//!     sdk.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod entities;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod media;
pub mod provisioning;
pub mod rewards;
pub mod sdk;
pub mod sync;
pub mod version;
pub mod weather;

pub use backend::{BackendClient, ChangeKind, MemoryBackend, Query};
pub use error::{BistroSDKError, Result};
pub use events::{EventFilter, EventManager, SDKEvent};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use provisioning::{EmployeeProvisioner, EmployeeUpdate, NewEmployee};
pub use rewards::RewardsLedger;
pub use sdk::{BackendConfig, BistroConfig, BistroConfigBuilder, BistroSDK, EventConfig, HttpClientConfig, WeatherConfig};
pub use sync::{EntitySyncHook, HookOptions, ListScope, SingletonSyncHook, SyncHookHandle, SyncState};
pub use weather::{WeatherClient, WeatherMonitor, WeatherReport, WeatherState};
