//! Extraction wizard: credentials first, then extraction parameters.

use crate::api_client::ApiClient;
use crate::errors::{AppError, ResultExt};
use crate::export::{export_filename, export_payload, save_export};
use crate::models::*;
use crate::session::SessionContext;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rows kept for the on-screen preview.
pub const PREVIEW_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    Login,
    Params,
}

/// Result of the last successful preview.
#[derive(Debug, Clone, Default)]
pub struct Preview {
    /// Total rows the backend reported.
    pub count: u64,
    /// At most [`PREVIEW_ROWS`] rows.
    pub rows: Vec<Record>,
}

impl Preview {
    /// Column names taken from the first row.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Outcome of forwarding rows to the workflow service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub count: u64,
    pub forwarded_to: String,
}

pub struct ExtractionWorkflow {
    api: ApiClient,
    session: Arc<SessionContext>,
    step: WorkflowStep,
    library: String,
    table: String,
    limit: u32,
    preview: Preview,
}

impl ExtractionWorkflow {
    pub fn new(api: ApiClient, session: Arc<SessionContext>) -> Self {
        Self {
            api,
            session,
            step: WorkflowStep::Login,
            library: String::new(),
            table: String::new(),
            limit: DEFAULT_LIMIT,
            preview: Preview::default(),
        }
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn set_library(&mut self, library: &str) {
        self.library = library.to_string();
    }

    pub fn set_table(&mut self, table: &str) {
        self.table = table.to_string();
    }

    /// Sets the row limit, clamped to the range the gateway accepts.
    pub fn set_limit(&mut self, limit: u32) {
        self.limit = limit.clamp(MIN_LIMIT, MAX_LIMIT);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Authenticates and moves to the parameter step.
    ///
    /// Missing credentials fail before any request is made.
    pub async fn login(&mut self, host: &str, user: &str, password: &str) -> Result<(), AppError> {
        if host.trim().is_empty() || user.trim().is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "Host, user and password are required.".to_string(),
            ));
        }

        let response = self
            .api
            .login(&LoginRequest {
                host: host.trim().to_string(),
                user: user.trim().to_string(),
                password: password.to_string(),
            })
            .await?;

        if response.access_token.is_empty() {
            return Err(AppError::InvalidResponse(
                "login response carried no access_token".to_string(),
            ));
        }
        self.session.login(&response.access_token)?;
        self.step = WorkflowStep::Params;
        Ok(())
    }

    /// Back to the credentials step; the token is kept.
    pub fn back(&mut self) {
        self.step = WorkflowStep::Login;
    }

    pub fn logout(&mut self) -> Result<(), AppError> {
        self.session.logout()?;
        self.step = WorkflowStep::Login;
        self.preview = Preview::default();
        Ok(())
    }

    fn token(&self) -> Result<String, AppError> {
        self.session
            .bearer()
            .ok_or_else(|| AppError::Unauthorized("log in first".to_string()))
    }

    fn request(&self) -> Result<ExtractionRequest, AppError> {
        if self.library.trim().is_empty() || self.table.trim().is_empty() {
            return Err(AppError::Validation(
                "Library and table are required.".to_string(),
            ));
        }
        Ok(ExtractionRequest::normalized(
            &self.library,
            &self.table,
            self.limit,
        ))
    }

    /// Queries the table and keeps the first [`PREVIEW_ROWS`] rows.
    pub async fn run_preview(&mut self) -> Result<&Preview, AppError> {
        let request = self.request()?;
        let token = self.token()?;

        let mut result = self.api.extract_rows(&request, Some(&token)).await?;
        result.rows.truncate(PREVIEW_ROWS);
        tracing::info!(
            "Preview of {}.{}: {} row(s) reported, {} shown",
            request.library,
            request.table,
            result.count,
            result.rows.len()
        );
        self.preview = Preview {
            count: result.count,
            rows: result.rows,
        };
        Ok(&self.preview)
    }

    /// Downloads the extraction in `format` and saves it under `dir`.
    ///
    /// Errors carry the format as prefix (`CSV: ...`).
    pub async fn download(&self, format: ExportFormat, dir: &Path) -> Result<PathBuf, AppError> {
        let label = format.as_param().to_uppercase();
        let request = self.request().context(label.clone())?;
        let token = self.token().context(label.clone())?;

        let response = self
            .api
            .extract(&request, format, Some(&token))
            .await
            .context(label.clone())?;
        let payload = export_payload(response).context(label.clone())?;
        let filename = export_filename(&request.library, &request.table, format, Utc::now());
        save_export(dir, &filename, &payload).await.context(label)
    }

    /// Re-extracts fresh rows and forwards them through `/etl/ingest`.
    ///
    /// An empty extraction is reported as an error and nothing is forwarded.
    pub async fn send_to_workflow(&self) -> Result<ForwardOutcome, AppError> {
        let request = self.request()?;
        let token = self.token()?;

        let result = self.api.extract_rows(&request, Some(&token)).await?;
        if result.rows.is_empty() {
            tracing::warn!(
                "Nothing to forward for {}.{}",
                request.library,
                request.table
            );
            return Err(AppError::EmptyResult(
                "no rows to send (empty query)".to_string(),
            ));
        }

        let sent = result.rows.len() as u64;
        let ingest = IngestRequest {
            library: request.library,
            table: request.table,
            limit: request.limit,
            rows: result.rows,
        };
        let response = self.api.ingest(&ingest, Some(&token)).await?;
        let outcome = ForwardOutcome {
            count: response.count.unwrap_or(sent),
            forwarded_to: response
                .forwarded_to
                .unwrap_or_else(|| "unknown".to_string()),
        };
        tracing::info!(
            "Forwarded {} row(s) to {}",
            outcome.count,
            outcome.forwarded_to
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_store::TokenStore;

    fn workflow() -> ExtractionWorkflow {
        let session = Arc::new(SessionContext::new(TokenStore::in_memory()).unwrap());
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        ExtractionWorkflow::new(api, session)
    }

    #[tokio::test]
    async fn test_login_requires_all_fields() {
        let mut wf = workflow();
        for (host, user, password) in [("", "u", "p"), ("h", "", "p"), ("h", "u", "")] {
            let err = wf.login(host, user, password).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert_eq!(wf.step(), WorkflowStep::Login);
    }

    #[tokio::test]
    async fn test_preview_requires_library_and_table() {
        let mut wf = workflow();
        wf.session().login("t").unwrap();
        wf.set_library("QIWS");
        let err = wf.run_preview().await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_preview_requires_token() {
        let mut wf = workflow();
        wf.set_library("QIWS");
        wf.set_table("QCUSTCDT");
        let err = wf.run_preview().await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_download_errors_are_prefixed() {
        let wf = workflow();
        let dir = std::env::temp_dir();
        let err = wf.download(ExportFormat::Csv, &dir).await.unwrap_err();
        assert!(err.to_string().starts_with("CSV: "));
    }

    #[test]
    fn test_limit_is_clamped() {
        let mut wf = workflow();
        wf.set_limit(0);
        assert_eq!(wf.limit(), 1);
        wf.set_limit(10_000);
        assert_eq!(wf.limit(), 5000);
    }

    #[test]
    fn test_back_keeps_token_logout_clears_it() {
        let mut wf = workflow();
        wf.session().login("kept").unwrap();
        wf.step = WorkflowStep::Params;

        wf.back();
        assert_eq!(wf.step(), WorkflowStep::Login);
        assert_eq!(wf.session().token(), "kept");

        wf.step = WorkflowStep::Params;
        wf.logout().unwrap();
        assert_eq!(wf.step(), WorkflowStep::Login);
        assert_eq!(wf.session().token(), "");
    }
}
