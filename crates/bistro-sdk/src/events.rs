//! 事件系统模块 - SDK 内部状态变化的统一出口
//!
//! 功能包括：
//! - 实体刷新成功 / 失败事件
//! - 实时变更通知事件
//! - 写操作失败事件
//! - 员工开通 / 回滚事件
//! - 天气刷新事件
//! - 事件广播和订阅机制

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::backend::ChangeKind;
use crate::sync::ListScope;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SDKEvent {
    /// 实体列表刷新完成
    EntityRefreshed {
        entity: String,
        scope: ListScope,
        count: usize,
        timestamp: u64,
    },
    /// 实体列表刷新失败（旧数据保留）
    EntityFetchFailed {
        entity: String,
        error: String,
        timestamp: u64,
    },
    /// 收到远端变更通知
    ChangeReceived {
        entity: String,
        change: ChangeKind,
        timestamp: u64,
    },
    /// 订阅状态变更
    SubscriptionChanged {
        entity: String,
        subscribed: bool,
        timestamp: u64,
    },
    /// 写操作失败
    MutationFailed {
        entity: String,
        operation: String,
        error: String,
        timestamp: u64,
    },
    /// 员工开通成功
    EmployeeProvisioned {
        user_id: String,
        username: String,
        timestamp: u64,
    },
    /// 员工资料写入失败，已尝试删除账号
    ProvisioningRolledBack {
        user_id: String,
        compensated: bool,
        error: String,
        timestamp: u64,
    },
    /// 天气刷新完成
    WeatherUpdated {
        location: String,
        temperature_f: f64,
        timestamp: u64,
    },
    /// 天气刷新失败
    WeatherFetchFailed {
        error: String,
        timestamp: u64,
    },
    /// App 前后台切换
    AppStateChanged {
        foreground: bool,
        timestamp: u64,
    },
}

fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

impl SDKEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SDKEvent::EntityRefreshed { .. } => "entity_refreshed",
            SDKEvent::EntityFetchFailed { .. } => "entity_fetch_failed",
            SDKEvent::ChangeReceived { .. } => "change_received",
            SDKEvent::SubscriptionChanged { .. } => "subscription_changed",
            SDKEvent::MutationFailed { .. } => "mutation_failed",
            SDKEvent::EmployeeProvisioned { .. } => "employee_provisioned",
            SDKEvent::ProvisioningRolledBack { .. } => "provisioning_rolled_back",
            SDKEvent::WeatherUpdated { .. } => "weather_updated",
            SDKEvent::WeatherFetchFailed { .. } => "weather_fetch_failed",
            SDKEvent::AppStateChanged { .. } => "app_state_changed",
        }
    }

    /// 获取事件相关的实体（如果有）
    pub fn entity(&self) -> Option<&str> {
        match self {
            SDKEvent::EntityRefreshed { entity, .. }
            | SDKEvent::EntityFetchFailed { entity, .. }
            | SDKEvent::ChangeReceived { entity, .. }
            | SDKEvent::SubscriptionChanged { entity, .. }
            | SDKEvent::MutationFailed { entity, .. } => Some(entity),
            SDKEvent::EmployeeProvisioned { .. } | SDKEvent::ProvisioningRolledBack { .. } => Some("employee"),
            _ => None,
        }
    }

    /// 获取事件时间戳（毫秒）
    pub fn timestamp(&self) -> u64 {
        match self {
            SDKEvent::EntityRefreshed { timestamp, .. }
            | SDKEvent::EntityFetchFailed { timestamp, .. }
            | SDKEvent::ChangeReceived { timestamp, .. }
            | SDKEvent::SubscriptionChanged { timestamp, .. }
            | SDKEvent::MutationFailed { timestamp, .. }
            | SDKEvent::EmployeeProvisioned { timestamp, .. }
            | SDKEvent::ProvisioningRolledBack { timestamp, .. }
            | SDKEvent::WeatherUpdated { timestamp, .. }
            | SDKEvent::WeatherFetchFailed { timestamp, .. }
            | SDKEvent::AppStateChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤
    pub event_types: Option<Vec<String>>,
    /// 实体过滤
    pub entities: Option<Vec<String>>,
}

impl EventFilter {
    /// 创建新的事件过滤器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置事件类型过滤
    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// 设置实体过滤
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SDKEvent) -> bool {
        if let Some(ref event_types) = self.event_types {
            if !event_types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref entities) = self.entities {
            match event.entity() {
                Some(entity) if entities.iter().any(|e| e == entity) => {}
                _ => return false,
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SDKEvent) + Send + Sync>;

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<SDKEvent>,
    /// 事件监听器映射
    listeners: Arc<tokio::sync::RwLock<HashMap<String, Vec<EventListener>>>>,
    /// 事件统计
    stats: Arc<tokio::sync::RwLock<EventStats>>,
}

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            stats: Arc::new(tokio::sync::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    pub async fn emit(&self, event: SDKEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write().await;
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景（无 UI 的后台任务）
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read().await;
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }

        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SDKEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器（`"*"` 监听全部事件）
    pub async fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SDKEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_type.to_string())
            .or_insert_with(Vec::new)
            .push(Box::new(listener));

        let mut stats = self.stats.write().await;
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub async fn clear_listeners(&self) {
        let mut listeners = self.listeners.write().await;
        listeners.clear();

        let mut stats = self.stats.write().await;
        stats.listener_count = 0;

        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub async fn get_stats(&self) -> EventStats {
        self.stats.read().await.clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SDKEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<SDKEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<SDKEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<SDKEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    pub fn entity_refreshed(entity: &str, scope: ListScope, count: usize) -> SDKEvent {
        SDKEvent::EntityRefreshed {
            entity: entity.to_string(),
            scope,
            count,
            timestamp: now_millis(),
        }
    }

    pub fn entity_fetch_failed(entity: &str, error: impl Into<String>) -> SDKEvent {
        SDKEvent::EntityFetchFailed {
            entity: entity.to_string(),
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn change_received(entity: &str, change: ChangeKind) -> SDKEvent {
        SDKEvent::ChangeReceived {
            entity: entity.to_string(),
            change,
            timestamp: now_millis(),
        }
    }

    pub fn subscription_changed(entity: &str, subscribed: bool) -> SDKEvent {
        SDKEvent::SubscriptionChanged {
            entity: entity.to_string(),
            subscribed,
            timestamp: now_millis(),
        }
    }

    pub fn mutation_failed(entity: &str, operation: &str, error: impl Into<String>) -> SDKEvent {
        SDKEvent::MutationFailed {
            entity: entity.to_string(),
            operation: operation.to_string(),
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn employee_provisioned(user_id: impl ToString, username: &str) -> SDKEvent {
        SDKEvent::EmployeeProvisioned {
            user_id: user_id.to_string(),
            username: username.to_string(),
            timestamp: now_millis(),
        }
    }

    pub fn provisioning_rolled_back(user_id: impl ToString, compensated: bool, error: impl Into<String>) -> SDKEvent {
        SDKEvent::ProvisioningRolledBack {
            user_id: user_id.to_string(),
            compensated,
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn weather_updated(location: &str, temperature_f: f64) -> SDKEvent {
        SDKEvent::WeatherUpdated {
            location: location.to_string(),
            temperature_f,
            timestamp: now_millis(),
        }
    }

    pub fn weather_fetch_failed(error: impl Into<String>) -> SDKEvent {
        SDKEvent::WeatherFetchFailed {
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn app_state_changed(foreground: bool) -> SDKEvent {
        SDKEvent::AppStateChanged {
            foreground,
            timestamp: now_millis(),
        }
    }
}
