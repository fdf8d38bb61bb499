//! SDK 生命周期管理
//!
//! 管理 App 前后台切换等一级生命周期事件，统一触发各模块的状态切换：
//! 切到后台时拆除所有同步订阅、暂停天气轮询；回到前台时恢复并重新拉取。

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 日志中显示的名称
    fn name(&self) -> &str {
        "anonymous"
    }

    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
    foreground: bool,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            hooks: Vec::new(),
            foreground: true,
        }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        info!("✅ 生命周期 Hook 已注册: {}", hook.name());
        self.hooks.push(hook);
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 所有 Hook 并发执行；某个 Hook 失败只记录，其余照常执行，最后返回第一个错误
    pub async fn notify_background(&mut self) -> Result<()> {
        if !self.foreground {
            return Ok(());
        }
        self.foreground = false;
        info!("🔄 通知所有模块：App 切换到后台");

        let results = join_all(self.hooks.iter().map(|hook| hook.on_background())).await;
        self.collect("后台", results)
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&mut self) -> Result<()> {
        if self.foreground {
            return Ok(());
        }
        self.foreground = true;
        info!("🔄 通知所有模块：App 切换到前台");

        let results = join_all(self.hooks.iter().map(|hook| hook.on_foreground())).await;
        self.collect("前台", results)
    }

    fn collect(&self, phase: &str, results: Vec<Result<()>>) -> Result<()> {
        let mut first_error = None;
        let mut failed = 0usize;
        for (hook, result) in self.hooks.iter().zip(results) {
            if let Err(e) = result {
                warn!("⚠️ Hook {} {}切换失败: {}", hook.name(), phase, e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                warn!("⚠️ {} 个模块{}切换失败，但所有模块都已尝试执行", failed, phase);
                Err(e)
            }
            None => {
                info!("✅ 所有模块{}切换完成", phase);
                Ok(())
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
