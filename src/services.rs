use crate::config::Config;
use crate::errors::AppError;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

/// Client for the external workflow-automation (n8n) webhook.
pub struct WorkflowService {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl WorkflowService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            url: config.n8n_url(),
            api_key: config.n8n_api_key.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts `filters` to the KPI webhook and returns its JSON answer verbatim.
    pub async fn fetch_kpis<F: Serialize + ?Sized>(&self, filters: &F) -> Result<Value, AppError> {
        tracing::info!("Calling workflow webhook {}", self.url);

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(filters);
        if let Some(ref key) = self.api_key {
            // Redact the key from logs
            tracing::debug!("Workflow webhook API key: [REDACTED]");
            request = request.header("X-N8N-API-KEY", key);
        }

        let response = request.send().await.map_err(|e| {
            AppError::Transport(format!("Workflow webhook request failed: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Workflow webhook returned error {}: {}", status, error_text);
            return Err(AppError::Http {
                status: status.as_u16(),
                message: format!("KPIs request failed: {} {}", status.as_u16(), error_text),
            });
        }

        let result: Value = response.json().await.map_err(|e| {
            AppError::InvalidResponse(format!("Failed to parse workflow webhook response: {}", e))
        })?;

        Ok(result)
    }
}
