use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_API_BASE: &str = "http://localhost:8020";
pub const DEFAULT_N8N_BASE: &str = "http://localhost:5678";
pub const DEFAULT_N8N_ENDPOINT: &str = "/webhook-test/etl-ibmi-kpis";
pub const DEFAULT_PROXY_PORT: u16 = 5173;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Gateway backend, without trailing slash.
    pub api_base_url: String,
    pub n8n_base_url: String,
    pub n8n_endpoint: String,
    pub n8n_api_key: Option<String>,
    /// Persistent key/value file (the "local storage" of this client).
    pub storage_path: PathBuf,
    pub export_dir: PathBuf,
    pub proxy_port: u16,
    pub proxy_api_target: String,
    pub proxy_n8n_target: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            n8n_base_url: DEFAULT_N8N_BASE.to_string(),
            n8n_endpoint: DEFAULT_N8N_ENDPOINT.to_string(),
            n8n_api_key: None,
            storage_path: PathBuf::from(".ibmi-extract/storage.json"),
            export_dir: PathBuf::from("."),
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_api_target: "http://127.0.0.1:8020".to_string(),
            proxy_n8n_target: "http://127.0.0.1:5678".to_string(),
        }
    }
}

/// Trims whitespace and a single trailing slash; blank input yields `None`.
pub fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.strip_suffix('/').unwrap_or(trimmed).to_string())
}

fn validate_http_url(name: &str, url: String) -> anyhow::Result<String> {
    let parsed = url::Url::parse(&url)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL ({}): {}", name, url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// The `VITE_*` names are accepted as aliases so an existing frontend
    /// `.env` file keeps working.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };
        let defaults = Config::default();

        let api_base_url = first(&["IBMI_API_BASE", "VITE_API_BASE"])
            .and_then(|raw| normalize_base_url(&raw))
            .unwrap_or(defaults.api_base_url);
        let api_base_url = validate_http_url("IBMI_API_BASE", api_base_url)?;

        let n8n_base_url = first(&["N8N_BASE_URL", "VITE_N8N_BASE_URL"])
            .and_then(|raw| normalize_base_url(&raw))
            .unwrap_or(defaults.n8n_base_url);
        let n8n_base_url = validate_http_url("N8N_BASE_URL", n8n_base_url)?;

        let n8n_endpoint = first(&["N8N_ENDPOINT", "VITE_N8N_ENDPOINT"])
            .map(|raw| {
                let raw = raw.trim().to_string();
                if raw.starts_with('/') {
                    raw
                } else {
                    format!("/{}", raw)
                }
            })
            .unwrap_or(defaults.n8n_endpoint);

        let proxy_port = match first(&["IBMI_PROXY_PORT"]) {
            Some(raw) => raw.trim().parse().map_err(|_| {
                anyhow::anyhow!("IBMI_PROXY_PORT must be a valid number between 1-65535")
            })?,
            None => defaults.proxy_port,
        };

        let proxy_api_target = first(&["IBMI_API_TARGET", "VITE_API_BASE"])
            .and_then(|raw| normalize_base_url(&raw))
            .unwrap_or(defaults.proxy_api_target);
        let proxy_api_target = validate_http_url("IBMI_API_TARGET", proxy_api_target)?;

        let proxy_n8n_target = first(&["IBMI_N8N_TARGET", "VITE_N8N_BASE"])
            .and_then(|raw| normalize_base_url(&raw))
            .unwrap_or(defaults.proxy_n8n_target);
        let proxy_n8n_target = validate_http_url("IBMI_N8N_TARGET", proxy_n8n_target)?;

        let config = Self {
            api_base_url,
            n8n_base_url,
            n8n_endpoint,
            n8n_api_key: first(&["N8N_API_KEY", "VITE_N8N_API_KEY"]),
            storage_path: first(&["IBMI_STORAGE_PATH"])
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            export_dir: first(&["IBMI_EXPORT_DIR"])
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            proxy_port,
            proxy_api_target,
            proxy_n8n_target,
        };

        // Never log the API key
        tracing::debug!("API base URL: {}", config.api_base_url);
        tracing::debug!(
            "Workflow service: {}{} (api key {})",
            config.n8n_base_url,
            config.n8n_endpoint,
            if config.n8n_api_key.is_some() { "set" } else { "unset" }
        );
        tracing::debug!("Storage file: {}", config.storage_path.display());

        Ok(config)
    }

    /// Full URL of the workflow-service webhook.
    pub fn n8n_url(&self) -> String {
        format!("{}{}", self.n8n_base_url, self.n8n_endpoint)
    }
}
