//! 天气查询
//!
//! 固定间隔（默认 30 分钟）轮询第三方天气接口 `{base}/forecast.json?key=..&q=..&days=N`。
//! 不做重试 / 退避：失败只写入错误信息，等下一次轮询；之前成功拿到的数据保留。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{BistroSDKError, Result};
use crate::events::{event_builders, EventManager};
use crate::lifecycle::LifecycleHook;
use crate::sdk::{HttpClientConfig, WeatherConfig};
use crate::version;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub text: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub localtime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    pub temp_f: f64,
    pub temp_c: f64,
    pub condition: WeatherCondition,
    #[serde(default)]
    pub humidity: Option<i32>,
    #[serde(default)]
    pub wind_mph: Option<f64>,
    #[serde(default)]
    pub feelslike_f: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub maxtemp_f: f64,
    pub mintemp_f: f64,
    #[serde(default)]
    pub daily_chance_of_rain: Option<i32>,
    pub condition: WeatherCondition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub day: DaySummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub forecastday: Vec<ForecastDay>,
}

/// 当前天气 + 多日预报
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: WeatherLocation,
    pub current: CurrentWeather,
    #[serde(default)]
    pub forecast: Forecast,
}

/// 天气状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherState {
    /// 最近一次成功的结果；失败不清空
    pub data: Option<WeatherReport>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 天气接口客户端
#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
    forecast_days: u8,
}

impl WeatherClient {
    pub fn new(config: &WeatherConfig, http: &HttpClientConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BistroSDKError::Config("未配置天气 API key".to_string()))?;

        let mut builder = Client::builder().user_agent(version::client_info());
        if let Some(timeout) = http.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }
        if let Some(timeout) = http.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|e| BistroSDKError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            forecast_days: config.forecast_days.max(1),
        })
    }

    /// 拉取当前天气与预报
    pub async fn fetch(&self, location: &str) -> Result<WeatherReport> {
        let url = format!("{}/forecast.json", self.base_url);
        let days = self.forecast_days.to_string();
        debug!("🌤️ 请求天气: {} (q={})", url, location);

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", location), ("days", days.as_str())])
            .send()
            .await
            .map_err(|e| BistroSDKError::Transport(format!("请求天气接口失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| format!("天气接口返回 {}", status));
            return Err(BistroSDKError::Http {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<WeatherReport>()
            .await
            .map_err(|e| BistroSDKError::Serialization(format!("解析天气数据失败: {}", e)))
    }
}

struct MonitorInner {
    client: WeatherClient,
    location: String,
    state: watch::Sender<WeatherState>,
    events: Option<Arc<EventManager>>,
}

impl MonitorInner {
    async fn poll(&self) -> Result<()> {
        self.state.send_modify(|s| s.loading = true);

        match self.client.fetch(&self.location).await {
            Ok(report) => {
                let temperature = report.current.temp_f;
                let place = report.location.name.clone();
                self.state.send_modify(|s| {
                    s.data = Some(report);
                    s.error = None;
                    s.loading = false;
                    s.last_updated = Some(Utc::now());
                });
                info!("🌤️ 天气已更新: {} {}°F", place, temperature);
                if let Some(events) = &self.events {
                    events.emit(event_builders::weather_updated(&place, temperature)).await;
                }
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                self.state.send_modify(|s| {
                    s.error = Some(message.clone());
                    s.loading = false;
                });
                error!("❌ 天气刷新失败: {}", e);
                if let Some(events) = &self.events {
                    events.emit(event_builders::weather_fetch_failed(message)).await;
                }
                Err(e)
            }
        }
    }
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 天气轮询
pub struct WeatherMonitor {
    inner: Arc<MonitorInner>,
    interval: Duration,
    task: Mutex<Option<PollTask>>,
    resume_on_foreground: AtomicBool,
}

impl WeatherMonitor {
    pub fn new(client: WeatherClient, location: impl Into<String>, interval: Duration) -> Self {
        Self::build(client, location.into(), interval, None)
    }

    pub fn from_config(config: &WeatherConfig, http: &HttpClientConfig, events: Option<Arc<EventManager>>) -> Result<Self> {
        let client = WeatherClient::new(config, http)?;
        Ok(Self::build(client, config.location.clone(), config.poll_interval(), events))
    }

    fn build(client: WeatherClient, location: String, interval: Duration, events: Option<Arc<EventManager>>) -> Self {
        let (state, _) = watch::channel(WeatherState::default());
        Self {
            inner: Arc::new(MonitorInner {
                client,
                location,
                state,
                events,
            }),
            interval,
            task: Mutex::new(None),
            resume_on_foreground: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 开始轮询：立即拉取一次，之后每个间隔拉取一次
    pub fn start(&self) {
        let mut slot = self.task.lock();
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let inner = self.inner.clone();
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        // 错误已写入状态，等待下一次轮询
                        let _ = inner.poll().await;
                    }
                }
            }
            debug!("天气轮询已停止");
        });

        info!("▶️ 天气轮询启动 (每 {} 秒, q={})", period.as_secs(), self.inner.location);
        *slot = Some(PollTask { cancel, handle });
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel.cancel();
            info!("⏹️ 天气轮询停止");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.cancel.is_cancelled() && !t.handle.is_finished())
    }

    /// 立即拉取一次（不影响轮询节奏）
    pub async fn refresh(&self) -> Result<()> {
        self.inner.poll().await
    }

    pub fn snapshot(&self) -> WeatherState {
        self.inner.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<WeatherState> {
        self.inner.state.subscribe()
    }
}

impl Drop for WeatherMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

#[async_trait]
impl LifecycleHook for WeatherMonitor {
    fn name(&self) -> &str {
        "weather"
    }

    async fn on_background(&self) -> Result<()> {
        if self.is_running() {
            self.resume_on_foreground.store(true, Ordering::SeqCst);
            self.stop();
        }
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        if self.resume_on_foreground.swap(false, Ordering::SeqCst) {
            self.start();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn sample_body() -> Value {
        json!({
            "location": {"name": "Austin", "region": "Texas", "country": "USA", "localtime": "2024-06-01 12:00"},
            "current": {
                "temp_f": 91.4,
                "temp_c": 33.0,
                "condition": {"text": "Sunny", "icon": "//cdn.weatherapi.com/113.png", "code": 1000},
                "humidity": 40,
                "wind_mph": 8.1
            },
            "forecast": {"forecastday": [
                {"date": "2024-06-01", "day": {"maxtemp_f": 95.0, "mintemp_f": 75.2, "daily_chance_of_rain": 10,
                    "condition": {"text": "Sunny", "icon": "", "code": 1000}}},
                {"date": "2024-06-02", "day": {"maxtemp_f": 90.0, "mintemp_f": 72.0,
                    "condition": {"text": "Patchy rain", "icon": "", "code": 1063}}}
            ]}
        })
    }

    fn config(server: &MockServer) -> WeatherConfig {
        WeatherConfig {
            api_key: Some("test-key".to_string()),
            location: "Austin".to_string(),
            base_url: server.base_url(),
            forecast_days: 3,
            poll_interval_secs: 1800,
        }
    }

    #[tokio::test]
    async fn fetch_sends_key_location_and_days() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/forecast.json")
                .query_param("key", "test-key")
                .query_param("q", "Austin")
                .query_param("days", "3");
            then.status(200).json_body(sample_body());
        });

        let client = WeatherClient::new(&config(&server), &HttpClientConfig::default()).unwrap();
        let report = client.fetch("Austin").await.unwrap();

        mock.assert();
        assert_eq!(report.location.name, "Austin");
        assert_eq!(report.current.condition.text, "Sunny");
        assert_eq!(report.forecast.forecastday.len(), 2);
        assert_eq!(report.forecast.forecastday[1].day.daily_chance_of_rain, None);
    }

    #[tokio::test]
    async fn failure_keeps_previous_report() {
        let server = MockServer::start();
        let mut ok = server.mock(|when, then| {
            when.method(GET).path("/forecast.json");
            then.status(200).json_body(sample_body());
        });
        let client = WeatherClient::new(&config(&server), &HttpClientConfig::default()).unwrap();
        let monitor = WeatherMonitor::new(client, "Austin", Duration::from_secs(1800));

        monitor.refresh().await.unwrap();
        let first = monitor.snapshot();
        assert!(first.data.is_some());
        assert!(first.error.is_none());

        ok.delete();
        server.mock(|when, then| {
            when.method(GET).path("/forecast.json");
            then.status(503)
                .json_body(json!({"error": {"code": 9999, "message": "Internal application error."}}));
        });

        assert!(monitor.refresh().await.is_err());
        let after = monitor.snapshot();
        assert_eq!(after.data, first.data);
        assert_eq!(after.error.as_deref(), Some("Internal application error."));
        assert!(!after.loading);
    }

    #[tokio::test]
    async fn failure_without_prior_success_leaves_data_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/forecast.json");
            then.status(401).body("unauthorized");
        });
        let client = WeatherClient::new(&config(&server), &HttpClientConfig::default()).unwrap();
        let monitor = WeatherMonitor::new(client, "Austin", Duration::from_secs(1800));

        let err = monitor.refresh().await.unwrap_err();
        assert_eq!(err.http_status(), Some(401));
        let state = monitor.snapshot();
        assert!(state.data.is_none());
        assert!(!state.error.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn start_polls_immediately_and_stop_cancels() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/forecast.json");
            then.status(200).json_body(sample_body());
        });
        let client = WeatherClient::new(&config(&server), &HttpClientConfig::default()).unwrap();
        let monitor = WeatherMonitor::new(client, "Austin", Duration::from_secs(1800));
        let mut changes = monitor.watch();

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::timeout(Duration::from_secs(5), async {
            while changes.borrow_and_update().data.is_none() {
                changes.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        monitor.stop();
        assert!(!monitor.is_running());
        mock.assert_hits(1);
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = WeatherConfig {
            api_key: None,
            ..WeatherConfig::default()
        };
        assert!(matches!(
            WeatherClient::new(&config, &HttpClientConfig::default()),
            Err(BistroSDKError::Config(_))
        ));
    }
}
