//! 托管服务 HTTP 客户端
//!
//! 使用 reqwest 访问三个子系统：
//! - `/rest/v1/{table}`：PostgREST 表接口
//! - `/storage/v1/object/...`：对象存储
//! - `/auth/v1/...`：账号管理（admin）与重置密码

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{AdminAuthApi, AuthUser, CreateUserRequest, ObjectStore, Query, TableApi};
use crate::error::{BistroSDKError, Result};
use crate::sdk::{BackendConfig, HttpClientConfig};
use crate::version;

/// 托管服务 REST 客户端
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    bearer: String,
    service_role_key: Option<String>,
    password_reset_redirect: Option<String>,
}

impl RestBackend {
    pub fn new(config: &BackendConfig, http: &HttpClientConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(BistroSDKError::Config("后端 URL 不能为空".to_string()));
        }
        if config.anon_key.trim().is_empty() {
            return Err(BistroSDKError::Config("anon key 不能为空".to_string()));
        }

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

        let base_url = config.url.trim_end_matches('/').to_string();
        info!("✅ REST 客户端已创建 (base_url: {})", base_url);

        Ok(Self {
            client,
            base_url,
            api_key: config.anon_key.clone(),
            bearer: config.access_token.clone().unwrap_or_else(|| config.anon_key.clone()),
            service_role_key: config.service_role_key.clone(),
            password_reset_redirect: config.password_reset_redirect.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn with_keys(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
            .header("X-Client-Info", version::client_info())
    }

    /// admin 接口必须使用 service role key
    fn with_admin_keys(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let key = self.service_role_key.as_ref().ok_or_else(|| {
            BistroSDKError::Config("账号管理需要配置 service role key".to_string())
        })?;
        Ok(request
            .header("apikey", key)
            .bearer_auth(key)
            .header("X-Client-Info", version::client_info()))
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BistroSDKError::Transport(format!("{}失败: {}", what, e)))?;
        check_status(response, what).await
    }

    fn require_filter(query: &Query, what: &str) -> Result<()> {
        if query.filters.is_empty() {
            return Err(BistroSDKError::InvalidInput(format!("{}必须带过滤条件", what)));
        }
        Ok(())
    }
}

/// 非 2xx 时读取错误体，映射为 `BistroSDKError::Http`
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "无法读取错误信息".to_string());
    let message = error_message(&body).unwrap_or(body);
    error!("❌ {}失败，HTTP 状态码: {}, 错误: {}", what, status, message);
    Err(BistroSDKError::Http {
        status: status.as_u16(),
        message,
    })
}

/// 三个子系统的错误体字段各不相同
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(String::from)
}

#[async_trait]
impl TableApi for RestBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        debug!("select {} {:?}", table, query.to_params());
        let request = self
            .with_keys(self.client.get(self.table_url(table)))
            .query(&[("select", "*")])
            .query(&query.to_params());
        let response = self.send(request, "查询").await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        let request = self
            .with_keys(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = self.send(request, "插入").await?;
        let mut rows = response.json::<Vec<Value>>().await?;
        if rows.is_empty() {
            return Err(BistroSDKError::Other(format!("插入 {} 未返回数据", table)));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, table: &str, filter: &Query, patch: Value) -> Result<Vec<Value>> {
        Self::require_filter(filter, "更新")?;
        let request = self
            .with_keys(self.client.patch(self.table_url(table)))
            .header("Prefer", "return=representation")
            .query(&filter.to_params())
            .json(&patch);
        let response = self.send(request, "更新").await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    async fn delete(&self, table: &str, filter: &Query) -> Result<()> {
        Self::require_filter(filter, "删除")?;
        let request = self
            .with_keys(self.client.delete(self.table_url(table)))
            .query(&filter.to_params());
        self.send(request, "删除").await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn upload(&self, bucket: &str, name: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, name);
        info!("📤 上传对象: {}/{} ({} bytes)", bucket, name, bytes.len());
        let request = self
            .with_keys(self.client.post(url))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        self.send(request, "上传文件").await?;
        Ok(())
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let request = self
            .with_keys(self.client.delete(url))
            .json(&json!({ "prefixes": names }));
        self.send(request, "删除文件").await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, name)
    }
}

#[async_trait]
impl AdminAuthApi for RestBackend {
    async fn create_user(&self, request: &CreateUserRequest) -> Result<AuthUser> {
        let url = format!("{}/auth/v1/admin/users", self.base_url);
        let http = self.with_admin_keys(self.client.post(url))?.json(request);
        let response = self.send(http, "创建账号").await?;
        Ok(response.json::<AuthUser>().await?)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let url = format!("{}/auth/v1/admin/users/{}", self.base_url, user_id);
        let http = self.with_admin_keys(self.client.delete(url))?;
        self.send(http, "删除账号").await?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<()> {
        let url = format!("{}/auth/v1/recover", self.base_url);
        let mut http = self.with_keys(self.client.post(url)).json(&json!({ "email": email }));
        if let Some(redirect) = &self.password_reset_redirect {
            http = http.query(&[("redirect_to", redirect)]);
        }
        self.send(http, "发送重置密码邮件").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OrderBy;
    use httpmock::prelude::*;

    fn backend(server: &MockServer, service_key: Option<&str>) -> RestBackend {
        let config = BackendConfig {
            url: server.base_url(),
            anon_key: "anon-key".to_string(),
            service_role_key: service_key.map(String::from),
            access_token: None,
            password_reset_redirect: None,
        };
        RestBackend::new(&config, &HttpClientConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn select_sends_filters_order_and_keys() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/v1/announcements")
                .query_param("select", "*")
                .query_param("is_active", "eq.true")
                .query_param("order", "display_order.asc,created_at.desc")
                .header("apikey", "anon-key")
                .header("authorization", "Bearer anon-key");
            then.status(200).json_body(json!([{"id": "a1", "title": "Open late"}]));
        });

        let rows = backend(&server, None)
            .select(
                "announcements",
                &Query::new()
                    .eq("is_active", true)
                    .order_by(OrderBy::asc("display_order"))
                    .order_by(OrderBy::desc("created_at")),
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "Open late");
    }

    #[tokio::test]
    async fn non_success_maps_to_http_error_with_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/rest/v1/reviews");
            then.status(400)
                .json_body(json!({"code": "23514", "message": "rating out of range"}));
        });

        let err = backend(&server, None)
            .insert("reviews", json!({"rating": 9}))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(400));
        assert_eq!(err.user_message(), "rating out of range");
    }

    #[tokio::test]
    async fn update_without_filter_is_rejected_locally() {
        let server = MockServer::start();
        let err = backend(&server, None)
            .update("events", &Query::new(), json!({"is_active": false}))
            .await
            .unwrap_err();
        assert!(matches!(err, BistroSDKError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn admin_calls_use_service_role_key() {
        let server = MockServer::start();
        let user_id = Uuid::new_v4();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/auth/v1/admin/users")
                .header("apikey", "service-key");
            then.status(200).json_body(json!({
                "id": user_id.to_string(),
                "email": "sam@bistro.test",
                "user_metadata": {"username": "sam"}
            }));
        });

        let rest = backend(&server, Some("service-key"));
        let user = rest
            .create_user(&CreateUserRequest {
                email: "sam@bistro.test".to_string(),
                password: "secret".to_string(),
                email_confirm: true,
                user_metadata: json!({"username": "sam"}),
            })
            .await
            .unwrap();

        create.assert();
        assert_eq!(user.id, user_id);
        assert_eq!(user.user_metadata["username"], "sam");
    }

    #[tokio::test]
    async fn admin_calls_without_service_key_fail_fast() {
        let server = MockServer::start();
        let err = backend(&server, None).delete_user(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BistroSDKError::Config(_)));
    }

    #[test]
    fn public_url_points_at_public_bucket_path() {
        let server = MockServer::start();
        let rest = backend(&server, None);
        assert_eq!(
            rest.public_url("gallery", "abc.jpg"),
            format!("{}/storage/v1/object/public/gallery/abc.jpg", server.base_url())
        );
    }
}
