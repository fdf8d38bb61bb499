//! SDK 配置与主入口
//!
//! - [`BistroConfig`]：后端、HTTP、天气、事件配置（支持 builder 与环境变量）
//! - [`BistroSDK`]：持有注入的 [`BackendClient`]、事件管理器、生命周期管理器，
//!   并负责创建各类同步 Hook / 员工开通 / 积分账本 / 天气轮询

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::BackendClient;
use crate::entities::{AboutUs, ContactInfo, EmployeeProfile, Entity};
use crate::error::{BistroSDKError, Result};
use crate::events::{event_builders, EventManager, SDKEvent};
use crate::lifecycle::{LifecycleHook, LifecycleManager};
use crate::provisioning::EmployeeProvisioner;
use crate::rewards::RewardsLedger;
use crate::sync::{EntitySyncHook, HookOptions, ListScope, SingletonSyncHook};
use crate::weather::WeatherMonitor;

/// 天气轮询默认间隔：30 分钟
pub const DEFAULT_WEATHER_POLL_SECS: u64 = 30 * 60;

/// 托管后端配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// 项目地址，例如 https://xyz.supabase.co
    pub url: String,
    /// 公开 anon key
    pub anon_key: String,
    /// service role key（账号管理需要；只应出现在管理端）
    pub service_role_key: Option<String>,
    /// 已登录用户的 access token；为空时用 anon key
    pub access_token: Option<String>,
    /// 重置密码邮件中的跳转地址
    pub password_reset_redirect: Option<String>,
}

impl BackendConfig {
    /// Realtime WebSocket 地址：`wss://{host}/realtime/v1/websocket?apikey=..&vsn=1.0.0`
    pub fn realtime_url(&self) -> Result<String> {
        let base = self.url.trim().trim_end_matches('/');
        let socket_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            return Err(BistroSDKError::Config(format!("无效的后端 URL: {}", self.url)));
        };
        if self.anon_key.trim().is_empty() {
            return Err(BistroSDKError::Config("anon key 不能为空".to_string()));
        }
        Ok(format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            socket_base, self.anon_key
        ))
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(60), // 上传图片 / PDF 需要较长时间
        }
    }
}

/// 天气配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// 未配置时不启用天气轮询
    pub api_key: Option<String>,
    /// 查询地点（城市名、邮编或经纬度）
    pub location: String,
    pub base_url: String,
    /// 预报天数
    pub forecast_days: u8,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
}

impl WeatherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            location: "auto:ip".to_string(),
            base_url: "https://api.weatherapi.com/v1".to_string(),
            forecast_days: 3,
            poll_interval_secs: DEFAULT_WEATHER_POLL_SECS,
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Bistro SDK 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BistroConfig {
    pub backend: BackendConfig,
    pub http_client_config: HttpClientConfig,
    pub weather: WeatherConfig,
    pub event_config: EventConfig,
    /// 新员工的固定初始密码（首次登录强制修改）
    pub employee_initial_password: Option<String>,
    /// 调试模式
    pub debug_mode: bool,
}

impl BistroConfig {
    pub fn builder() -> BistroConfigBuilder {
        BistroConfigBuilder::new()
    }

    /// 从进程环境变量读取（先加载当前目录的 `.env`）
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(BistroSDKError::Config(format!("读取 .env 失败: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从指定的 env 文件读取，不修改进程环境
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| BistroSDKError::Config(format!("读取 {} 失败: {}", path.display(), e)))?;
        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| BistroSDKError::Config(format!("解析 {} 失败: {}", path.display(), e)))?;
            vars.insert(key, value);
        }
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        config.backend.url = non_empty("BISTRO_URL")
            .ok_or_else(|| BistroSDKError::Config("缺少 BISTRO_URL".to_string()))?;
        config.backend.anon_key = non_empty("BISTRO_ANON_KEY")
            .ok_or_else(|| BistroSDKError::Config("缺少 BISTRO_ANON_KEY".to_string()))?;
        config.backend.service_role_key = non_empty("BISTRO_SERVICE_ROLE_KEY");
        config.backend.access_token = non_empty("BISTRO_ACCESS_TOKEN");
        config.backend.password_reset_redirect = non_empty("BISTRO_PASSWORD_RESET_REDIRECT");

        if let Some(secs) = non_empty("BISTRO_HTTP_TIMEOUT_SECS") {
            config.http_client_config.request_timeout_secs = Some(parse_number("BISTRO_HTTP_TIMEOUT_SECS", &secs)?);
        }

        config.weather.api_key = non_empty("BISTRO_WEATHER_API_KEY");
        if let Some(location) = non_empty("BISTRO_WEATHER_LOCATION") {
            config.weather.location = location;
        }
        if let Some(base_url) = non_empty("BISTRO_WEATHER_BASE_URL") {
            config.weather.base_url = base_url;
        }
        if let Some(days) = non_empty("BISTRO_WEATHER_DAYS") {
            config.weather.forecast_days = parse_number("BISTRO_WEATHER_DAYS", &days)?;
        }
        if let Some(secs) = non_empty("BISTRO_WEATHER_POLL_SECS") {
            config.weather.poll_interval_secs = parse_number("BISTRO_WEATHER_POLL_SECS", &secs)?;
        }

        config.employee_initial_password = non_empty("BISTRO_EMPLOYEE_INITIAL_PASSWORD");
        config.debug_mode = matches!(
            non_empty("BISTRO_DEBUG").as_deref(),
            Some("1") | Some("true") | Some("TRUE")
        );
        Ok(config)
    }

    /// 连接托管服务前的校验
    pub fn validate(&self) -> Result<()> {
        if self.backend.url.trim().is_empty() {
            return Err(BistroSDKError::Config("后端 URL 不能为空".to_string()));
        }
        if self.backend.anon_key.trim().is_empty() {
            return Err(BistroSDKError::Config("anon key 不能为空".to_string()));
        }
        if self.event_config.buffer_size == 0 {
            return Err(BistroSDKError::Config("事件缓冲区大小必须大于 0".to_string()));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BistroSDKError::Config(format!("{} 不是有效数字: {}", key, value)))
}

/// Bistro SDK 配置构建器
#[derive(Default)]
pub struct BistroConfigBuilder {
    config: BistroConfig,
}

impl BistroConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend.url = url.into();
        self
    }

    pub fn anon_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.backend.anon_key = key.into();
        self
    }

    pub fn service_role_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.backend.service_role_key = Some(key.into());
        self
    }

    pub fn access_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.backend.access_token = Some(token.into());
        self
    }

    pub fn password_reset_redirect<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend.password_reset_redirect = Some(url.into());
        self
    }

    pub fn http_client_config(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client_config = config;
        self
    }

    pub fn weather_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.weather.api_key = Some(key.into());
        self
    }

    pub fn weather_location<S: Into<String>>(mut self, location: S) -> Self {
        self.config.weather.location = location.into();
        self
    }

    pub fn weather_config(mut self, config: WeatherConfig) -> Self {
        self.config.weather = config;
        self
    }

    pub fn event_config(mut self, config: EventConfig) -> Self {
        self.config.event_config = config;
        self
    }

    pub fn employee_initial_password<S: Into<String>>(mut self, password: S) -> Self {
        self.config.employee_initial_password = Some(password.into());
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> BistroConfig {
        self.config
    }
}

/// 统一 SDK 主接口
///
/// - 后端访问：注入的 [`BackendClient`]（托管服务或内存后端）
/// - 事件系统：[`EventManager`]
/// - 生命周期：已登记的 Hook 与天气轮询随前后台切换停用 / 恢复
pub struct BistroSDK {
    config: BistroConfig,
    client: BackendClient,
    event_manager: Arc<EventManager>,
    lifecycle_manager: Mutex<LifecycleManager>,
    weather: Option<Arc<WeatherMonitor>>,
    shutting_down: AtomicBool,
}

impl BistroSDK {
    /// 连接托管服务并初始化
    pub async fn initialize(config: BistroConfig) -> Result<Arc<Self>> {
        info!("正在初始化 BistroSDK...");
        config.validate()?;
        let client = BackendClient::remote(&config)?;
        Self::initialize_with_client(config, client).await
    }

    /// 使用外部构造的后端客户端初始化（测试 / 离线演示使用内存后端）
    pub async fn initialize_with_client(config: BistroConfig, client: BackendClient) -> Result<Arc<Self>> {
        let event_manager = Arc::new(EventManager::new(config.event_config.buffer_size.max(1)));
        let mut lifecycle_manager = LifecycleManager::new();

        let weather = match config.weather.api_key {
            Some(_) => {
                let monitor = Arc::new(WeatherMonitor::from_config(
                    &config.weather,
                    &config.http_client_config,
                    Some(event_manager.clone()),
                )?);
                lifecycle_manager.register_hook(monitor.clone());
                monitor.start();
                Some(monitor)
            }
            None => {
                info!("未配置天气 API key，跳过天气轮询");
                None
            }
        };

        info!("✅ BistroSDK 初始化完成 (version {})", crate::version::SDK_VERSION);
        Ok(Arc::new(Self {
            config,
            client,
            event_manager,
            lifecycle_manager: Mutex::new(lifecycle_manager),
            weather,
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &BistroConfig {
        &self.config
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub fn event_manager(&self) -> Arc<EventManager> {
        self.event_manager.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SDKEvent> {
        self.event_manager.subscribe()
    }

    /// 创建列表 Hook（未激活）
    pub fn entity_hook<E: Entity>(&self, scope: ListScope) -> EntitySyncHook<E> {
        EntitySyncHook::with_options(
            self.client.clone(),
            HookOptions::new(scope).events(self.event_manager.clone()),
        )
    }

    pub fn singleton_hook<E: Entity>(&self, scope: ListScope) -> SingletonSyncHook<E> {
        SingletonSyncHook::with_events(self.client.clone(), scope, Some(self.event_manager.clone()))
    }

    pub fn contact_info(&self) -> SingletonSyncHook<ContactInfo> {
        self.singleton_hook(ListScope::Visible)
    }

    pub fn about_us(&self) -> SingletonSyncHook<AboutUs> {
        self.singleton_hook(ListScope::Visible)
    }

    /// 员工名录（管理端包含已停用员工）
    pub fn employees(&self, scope: ListScope) -> EntitySyncHook<EmployeeProfile> {
        self.entity_hook(scope)
    }

    pub fn rewards_ledger(&self, customer_id: Uuid) -> RewardsLedger {
        RewardsLedger::new(self.client.clone(), customer_id, Some(self.event_manager.clone()))
    }

    pub fn provisioner(&self) -> Result<EmployeeProvisioner> {
        let password = self
            .config
            .employee_initial_password
            .clone()
            .ok_or_else(|| BistroSDKError::Config("未配置员工初始密码".to_string()))?;
        Ok(EmployeeProvisioner::new(self.client.clone(), password)?.with_events(self.event_manager.clone()))
    }

    pub fn weather(&self) -> Option<Arc<WeatherMonitor>> {
        self.weather.clone()
    }

    /// 登记到生命周期管理（切后台时停用，回前台时恢复）
    pub async fn track(&self, hook: impl LifecycleHook + 'static) {
        self.lifecycle_manager.lock().await.register_hook(Arc::new(hook));
    }

    /// 进入后台：拆除已登记 Hook 的订阅，暂停天气轮询
    pub async fn enter_background(&self) -> Result<()> {
        info!("应用进入后台");
        self.event_manager.emit(event_builders::app_state_changed(false)).await;
        self.lifecycle_manager.lock().await.notify_background().await
    }

    /// 进入前台：恢复订阅并重新拉取，恢复天气轮询
    pub async fn enter_foreground(&self) -> Result<()> {
        info!("应用进入前台");
        self.event_manager.emit(event_builders::app_state_changed(true)).await;
        self.lifecycle_manager.lock().await.notify_foreground().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 关闭 SDK
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("正在关闭 BistroSDK...");

        if let Some(weather) = &self.weather {
            weather.stop();
        }
        if let Err(e) = self.lifecycle_manager.lock().await.notify_background().await {
            warn!("⚠️ 关闭时停用模块失败: {}", e);
        }
        self.event_manager.clear_listeners().await;

        info!("BistroSDK 关闭完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOp, MemoryBackend};
    use crate::entities::Announcement;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn realtime_url_switches_scheme() {
        let config = BackendConfig {
            url: "https://demo.supabase.co/".to_string(),
            anon_key: "anon".to_string(),
            ..BackendConfig::default()
        };
        assert_eq!(
            config.realtime_url().unwrap(),
            "wss://demo.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = BackendConfig {
            url: "http://127.0.0.1:54321".to_string(),
            anon_key: "anon".to_string(),
            ..BackendConfig::default()
        };
        assert!(local.realtime_url().unwrap().starts_with("ws://127.0.0.1:54321/"));

        let bad = BackendConfig {
            url: "ftp://nope".to_string(),
            anon_key: "anon".to_string(),
            ..BackendConfig::default()
        };
        assert!(bad.realtime_url().is_err());
    }

    #[test]
    fn env_file_populates_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "BISTRO_URL=https://demo.supabase.co").unwrap();
        writeln!(file, "BISTRO_ANON_KEY=anon").unwrap();
        writeln!(file, "BISTRO_WEATHER_API_KEY=wkey").unwrap();
        writeln!(file, "BISTRO_WEATHER_LOCATION=Austin").unwrap();
        writeln!(file, "BISTRO_WEATHER_POLL_SECS=600").unwrap();
        writeln!(file, "BISTRO_EMPLOYEE_INITIAL_PASSWORD=Welcome2024!").unwrap();

        let config = BistroConfig::from_env_file(file.path()).unwrap();
        assert_eq!(config.backend.url, "https://demo.supabase.co");
        assert_eq!(config.weather.api_key.as_deref(), Some("wkey"));
        assert_eq!(config.weather.location, "Austin");
        assert_eq!(config.weather.poll_interval(), Duration::from_secs(600));
        assert_eq!(config.weather.forecast_days, 3);
        assert!(config.backend.service_role_key.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn env_file_without_url_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "BISTRO_ANON_KEY=anon").unwrap();
        writeln!(file, "BISTRO_WEATHER_DAYS=abc").unwrap();
        assert!(matches!(
            BistroConfig::from_env_file(file.path()),
            Err(BistroSDKError::Config(_))
        ));
    }

    #[test]
    fn default_weather_interval_is_thirty_minutes() {
        assert_eq!(WeatherConfig::default().poll_interval(), Duration::from_secs(1800));
    }

    async fn memory_sdk(backend: Arc<MemoryBackend>) -> Arc<BistroSDK> {
        let config = BistroConfig::builder()
            .employee_initial_password("Welcome2024!")
            .build();
        BistroSDK::initialize_with_client(config, BackendClient::in_memory(backend))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn background_tears_down_tracked_hooks_and_foreground_refetches() {
        let backend = Arc::new(MemoryBackend::new());
        let sdk = memory_sdk(backend.clone()).await;
        let hook = sdk.entity_hook::<Announcement>(ListScope::Visible);
        hook.activate().await.unwrap();
        sdk.track(hook.lifecycle_handle()).await;
        assert!(sdk.weather().is_none());

        sdk.enter_background().await.unwrap();
        assert!(!hook.is_active());
        assert!(!hook.is_listening());

        backend.seed(
            "announcements",
            vec![json!({"title": "Back soon", "content": "x", "is_active": true, "display_order": 0})],
        );
        let selects = backend.call_count(BackendOp::Select);
        sdk.enter_foreground().await.unwrap();

        assert!(hook.is_active());
        assert!(hook.is_listening());
        assert_eq!(backend.call_count(BackendOp::Select), selects + 1);
        assert_eq!(hook.data().len(), 1);

        sdk.shutdown().await.unwrap();
        assert!(!hook.is_active());
    }

    #[tokio::test]
    async fn provisioner_requires_initial_password() {
        let backend = Arc::new(MemoryBackend::new());
        let sdk = BistroSDK::initialize_with_client(BistroConfig::default(), BackendClient::in_memory(backend))
            .await
            .unwrap();
        assert!(matches!(sdk.provisioner(), Err(BistroSDKError::Config(_))));
    }
}
