//! 实体同步 Hook
//!
//! 职责：
//! - 激活时按范围（顾客端 / 管理端）查询一张表，结果写入本地状态
//! - 持有该表的变更订阅，任何通知都触发整表重新拉取
//! - 提供写操作，成功后走同一条重新拉取路径
//! - 拆除时取消订阅，并丢弃仍在途中的拉取结果

mod engine;
mod hook;
mod singleton;
mod state;

pub use engine::SyncHookHandle;
pub use hook::{EntitySyncHook, HookOptions};
pub use singleton::SingletonSyncHook;
pub use state::{ListScope, SyncState};
