use anyhow::Context;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::credentials;
use crate::auth::{CredentialSet, RefreshCoordinator, Scope, Session};
use crate::config::Config;
use crate::error::{ApiError, RefreshError, Result};
use crate::storage::TokenStorage;

/// Resends allowed after a successful token refresh
const MAX_AUTH_RETRIES: u32 = 1;

/// How the response body should be decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// JSON, falling back to text for non-JSON bodies
    #[default]
    Json,

    /// Raw bytes, for report and file downloads
    Blob,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub response_type: ResponseType,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn blob() -> Self {
        Self {
            response_type: ResponseType::Blob,
            ..Self::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Decoded response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Bytes(Bytes),
    Empty,
}

/// Successful (2xx) response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Deserialize a JSON body into `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.body {
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Empty => Value::Null,
            ResponseBody::Text(_) | ResponseBody::Bytes(_) => {
                return Err(ApiError::Decode("response body is not JSON".to_string()))
            }
        };

        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Raw bytes of a blob response
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// State carried by one logical call across its original send and retry
///
/// Never mutated; [`RequestContext::retried`] returns the next attempt's context.
#[derive(Debug, Clone)]
struct RequestContext {
    request_id: String,
    method: Method,
    url: Url,
    body: Option<Value>,
    options: RequestOptions,
    retries: u32,
}

impl RequestContext {
    fn new(method: Method, url: Url, body: Option<Value>, options: RequestOptions) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            method,
            url,
            body,
            options,
            retries: 0,
        }
    }

    fn can_retry(&self) -> bool {
        self.retries < MAX_AUTH_RETRIES
    }

    fn retried(&self) -> Self {
        Self {
            retries: self.retries + 1,
            ..self.clone()
        }
    }
}

/// Authenticated HTTP client for the admin API
///
/// Attaches the active bearer token to every call and transparently
/// recovers from an expired access token with one shared refresh per scope.
#[derive(Clone)]
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL without trailing slash
    base_url: String,

    /// Where both credential sets live
    storage: Arc<dyn TokenStorage>,

    /// In-flight refreshes, per scope
    refresh: RefreshCoordinator,
}

impl ApiClient {
    /// Create a client from configuration
    pub fn new(config: &Config, storage: Arc<dyn TokenStorage>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(client, &config.base_url, storage))
    }

    /// Create a client around a prebuilt `reqwest::Client`
    pub fn with_client(client: Client, base_url: &str, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            storage,
            refresh: RefreshCoordinator::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Credential set currently used for authorization
    pub fn session(&self) -> Session {
        let (admin, employee) = credentials::load_both(self.storage.as_ref());
        credentials::select_session(admin, employee)
    }

    /// Whether a token refresh is outstanding for `scope`
    pub fn refresh_in_flight(&self, scope: Scope) -> bool {
        self.refresh.in_flight(scope)
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.request(Method::PUT, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<ApiResponse> {
        self.request(Method::PATCH, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    /// GET a file (report export, document) as raw bytes
    pub async fn download(&self, path: &str, options: RequestOptions) -> Result<Bytes> {
        let options = RequestOptions {
            response_type: ResponseType::Blob,
            ..options
        };
        let response = self.request(Method::GET, path, None, options).await?;

        into_bytes(response.body)
    }

    /// Issue a request, refreshing the access token and resending once on 401
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let mut ctx = RequestContext::new(method, self.url_for(path)?, body, options);
        let mut token = self.session().access_token().map(str::to_string);

        loop {
            let result = self.send(&ctx, token.as_deref()).await;
            match result {
                Err(err) if err.is_unauthorized() && ctx.can_retry() => {
                    match self.recover(&ctx).await {
                        Some(new_token) => {
                            token = Some(new_token);
                            ctx = ctx.retried();
                        }
                        None => return Err(err),
                    }
                }
                other => return other,
            }
        }
    }

    /// Log in and store the returned credential set for `scope`
    pub async fn login(&self, scope: Scope, email: &str, password: &str) -> Result<CredentialSet> {
        let creds =
            crate::auth::login(&self.client, &self.base_url, scope, email, password).await?;
        credentials::save(self.storage.as_ref(), scope, &creds)?;

        tracing::info!(scope = %scope, "Stored credentials after login");
        Ok(creds)
    }

    /// Forget the stored credential set for `scope`
    pub fn logout(&self, scope: Scope) -> Result<()> {
        credentials::clear(self.storage.as_ref(), scope)?;
        tracing::info!(scope = %scope, "Cleared stored credentials");
        Ok(())
    }

    /// Resolve a path against the base URL; absolute URLs pass through
    fn url_for(&self, path: &str) -> Result<Url> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };

        Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// One network attempt; non-2xx statuses become `ApiError::Status`
    async fn send(&self, ctx: &RequestContext, token: Option<&str>) -> Result<ApiResponse> {
        let mut builder = self.client.request(ctx.method.clone(), ctx.url.clone());

        if !ctx.options.query.is_empty() {
            builder = builder.query(&ctx.options.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &ctx.body {
            builder = builder.json(body);
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            url = %ctx.url,
            attempt = ctx.retries + 1,
            authorized = token.is_some(),
            "Sending HTTP request"
        );

        let response = builder.send().await.map_err(|e| {
            let err = ApiError::from(e);
            tracing::warn!(
                request_id = %ctx.request_id,
                url = %ctx.url,
                error = %err,
                "HTTP request error"
            );
            err
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                request_id = %ctx.request_id,
                status = status.as_u16(),
                url = %ctx.url,
                "Received error response"
            );
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let headers = response.headers().clone();
        let bytes = response.bytes().await?;
        let body = decode_body(bytes, ctx.options.response_type)?;

        tracing::debug!(
            request_id = %ctx.request_id,
            status = status.as_u16(),
            "Request successful"
        );

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    /// Obtain a fresh access token after a 401, `None` when recovery is impossible
    async fn recover(&self, ctx: &RequestContext) -> Option<String> {
        let (admin, employee) = credentials::load_both(self.storage.as_ref());

        let Some((scope, creds)) = credentials::refresh_target(admin.as_ref(), employee.as_ref())
        else {
            tracing::debug!(
                request_id = %ctx.request_id,
                "Received 401 with no refresh token available"
            );
            return None;
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            scope = %scope,
            "Received 401, refreshing access token"
        );

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let storage = Arc::clone(&self.storage);

        let outcome = self
            .refresh
            .run(scope, move || async move {
                let token = crate::auth::refresh_access_token(
                    &client,
                    &base_url,
                    scope,
                    &creds.refresh_token,
                )
                .await?;

                credentials::save(storage.as_ref(), scope, &creds.with_access_token(&token))
                    .map_err(|e| RefreshError::Storage(e.to_string()))?;

                Ok::<_, RefreshError>(token)
            })
            .await;

        match outcome {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    scope = %scope,
                    error = %e,
                    "Token refresh failed, returning original 401"
                );
                None
            }
        }
    }
}

/// Decode a 2xx body according to the requested response type
fn decode_body(bytes: Bytes, response_type: ResponseType) -> Result<ResponseBody> {
    if response_type == ResponseType::Blob {
        return Ok(ResponseBody::Bytes(bytes));
    }

    if bytes.is_empty() {
        return Ok(ResponseBody::Empty);
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Ok(ResponseBody::Json(value)),
        Err(_) => String::from_utf8(bytes.to_vec())
            .map(ResponseBody::Text)
            .map_err(|e| ApiError::Decode(e.to_string())),
    }
}

/// Raw bytes of a blob body; any other shape is a decode error
fn into_bytes(body: ResponseBody) -> Result<Bytes> {
    match body {
        ResponseBody::Bytes(bytes) => Ok(bytes),
        other => Err(ApiError::Decode(format!(
            "expected a binary body, got {:?}",
            other
        ))),
    }
}
