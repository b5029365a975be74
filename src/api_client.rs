use crate::config::{normalize_base_url, Config, DEFAULT_API_BASE};
use crate::errors::AppError;
use crate::models::*;
use crate::token_store::auth_headers;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Client-side limit for the health check.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(7);

/// Payload of a successful gateway call.
#[derive(Debug, Clone)]
pub enum ApiResponse {
    /// Response declared `application/json`.
    Json(Value),
    /// Anything else (CSV, XLSX...), kept as raw bytes.
    Binary {
        content_type: Option<String>,
        bytes: Bytes,
    },
}

impl ApiResponse {
    /// Decodes a JSON payload into `T`; a binary payload is an error.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, AppError> {
        match self {
            ApiResponse::Json(value) => Ok(serde_json::from_value(value)?),
            ApiResponse::Binary { content_type, .. } => Err(AppError::InvalidResponse(format!(
                "expected JSON, got {}",
                content_type.as_deref().unwrap_or("an untyped body")
            ))),
        }
    }
}

/// Client for the IBM i gateway backend.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl ApiClient {
    /// Creates a new `ApiClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Gateway base URL. A trailing slash is dropped and a blank
    ///   value falls back to the default.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(base_url).unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            health_timeout: HEALTH_TIMEOUT,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(&config.api_base_url)
    }

    /// Overrides the health check timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POSTs `body` (or `{}`) as JSON to `path`.
    ///
    /// # Returns
    ///
    /// * `ApiResponse::Json` when the response declares a JSON content type,
    ///   `ApiResponse::Binary` otherwise.
    /// * `AppError::Http` for any non-2xx status, carrying the normalized message.
    pub async fn request(
        &self,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<ApiResponse, AppError> {
        let url = self.url(path);
        let body = body.unwrap_or_else(|| json!({}));
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .headers(auth_headers(token.unwrap_or_default()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = normalize_error_message(status.as_u16(), &text);
            tracing::warn!("POST {} failed with {}: {}", path, status, message);
            return Err(AppError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        if content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
        {
            let value = if bytes.is_empty() {
                json!({})
            } else {
                serde_json::from_slice(&bytes)?
            };
            tracing::debug!("POST {} ok (json)", path);
            return Ok(ApiResponse::Json(value));
        }

        tracing::debug!("POST {} ok ({} bytes)", path, bytes.len());
        Ok(ApiResponse::Binary {
            content_type,
            bytes,
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<T, AppError> {
        let body = serde_json::to_value(body)?;
        self.request(path, Some(body), token).await?.into_json()
    }

    /// GET `/health` with the client-side timeout.
    ///
    /// The whole exchange is dropped when the timeout fires, which yields
    /// `AppError::Timeout` rather than a transport error.
    pub async fn health(&self, token: Option<&str>) -> Result<HealthStatus, AppError> {
        let url = self.url("/health");
        let check = async {
            let response = self
                .client
                .get(&url)
                .headers(auth_headers(token.unwrap_or_default()))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AppError::Http {
                    status: status.as_u16(),
                    message: format!("HTTP {}", status.as_u16()),
                });
            }
            let text = response.text().await?;
            Ok::<String, AppError>(health_message(&text))
        };

        match tokio::time::timeout(self.health_timeout, check).await {
            Ok(result) => result.map(|message| HealthStatus { message }),
            Err(_) => {
                tracing::warn!("Health check timed out after {:?}", self.health_timeout);
                Err(AppError::Timeout)
            }
        }
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AppError> {
        tracing::info!("Logging in to {} as {}", request.host, request.user);
        self.post_json("/login", request, None).await
    }

    /// `/extract` in the requested format.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        format: ExportFormat,
        token: Option<&str>,
    ) -> Result<ApiResponse, AppError> {
        tracing::info!(
            "Extracting {}.{} (limit {}, format {})",
            request.library,
            request.table,
            request.limit,
            format
        );
        let path = format!("/extract?format={}", format.as_param());
        self.request(&path, Some(serde_json::to_value(request)?), token)
            .await
    }

    /// `/extract?format=json`, decoded.
    pub async fn extract_rows(
        &self,
        request: &ExtractionRequest,
        token: Option<&str>,
    ) -> Result<ExtractionResult, AppError> {
        self.extract(request, ExportFormat::Json, token)
            .await?
            .into_json()
    }

    pub async fn ingest(
        &self,
        request: &IngestRequest,
        token: Option<&str>,
    ) -> Result<IngestResponse, AppError> {
        tracing::info!(
            "Forwarding {} row(s) of {}.{} to /etl/ingest",
            request.rows.len(),
            request.library,
            request.table
        );
        self.post_json("/etl/ingest", request, token).await
    }

    pub async fn list_schemas(
        &self,
        pattern: &str,
        token: Option<&str>,
    ) -> Result<Vec<String>, AppError> {
        let query = SchemaQuery {
            pattern: pattern.to_string(),
        };
        let list: SchemaList = self.post_json("/catalog/schemas", &query, token).await?;
        Ok(list.schemas)
    }

    pub async fn list_tables(
        &self,
        library: &str,
        pattern: &str,
        limit: u32,
        token: Option<&str>,
    ) -> Result<Vec<String>, AppError> {
        let query = TableQuery {
            library: library.to_string(),
            pattern: pattern.to_string(),
            limit,
        };
        let list: TableList = self.post_json("/catalog", &query, token).await?;
        Ok(list.items.into_iter().map(|item| item.table).collect())
    }

    pub async fn query_kpis(
        &self,
        query: &KpiQuery,
        token: Option<&str>,
    ) -> Result<KpiResult, AppError> {
        tracing::info!(
            "Querying KPIs {}..{} ({:?}, top {} by {})",
            query.date_from,
            query.date_to,
            query.series_granularity,
            query.limit_top,
            query.top_dim.as_str()
        );
        self.post_json("/kpis/query", query, token).await
    }
}

/// Error message for a failed call: the JSON `detail` field, else the raw
/// body, else `HTTP <status>`.
pub fn normalize_error_message(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        match parsed.get("detail") {
            Some(Value::String(detail)) if !detail.is_empty() => return detail.clone(),
            Some(Value::Null) | None => {}
            Some(Value::String(_)) => {}
            // Structured details (e.g. validation error lists) are shown as JSON
            Some(other) => return other.to_string(),
        }
    }
    if !body.is_empty() {
        return body.to_string();
    }
    format!("HTTP {}", status)
}

fn health_message(text: &str) -> String {
    let message = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_string))
        .unwrap_or_else(|| text.to_string());
    if message.is_empty() {
        "OK".to_string()
    } else {
        message
    }
}
