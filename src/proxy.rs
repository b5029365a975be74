//! Development proxy.
//!
//! Serves the same prefixes the browser build expects: `/api/*` goes to the
//! gateway backend and `/n8n/*` to the workflow service, each with its prefix
//! stripped. Requests and responses are forwarded as-is apart from
//! hop-by-hop headers.

use crate::config::Config;
use crate::errors::AppError;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Largest request body forwarded upstream.
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Upstream targets shared by the proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    api_target: String,
    n8n_target: String,
}

impl ProxyState {
    pub fn new(api_target: &str, n8n_target: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to create proxy client: {}", e)))?;
        Ok(Self {
            client,
            api_target: api_target.trim_end_matches('/').to_string(),
            n8n_target: n8n_target.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(&config.proxy_api_target, &config.proxy_n8n_target)
    }
}

/// Builds the proxy router with tracing, CORS and body-size layers.
pub fn build_router(state: ProxyState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/*rest", any(forward_api))
        .route("/n8n/*rest", any(forward_n8n))
        .with_state(Arc::new(state))
        .layer(
            ServiceBuilder::new()
                // Exports can be large, uploads are not
                .layer(RequestBodyLimitLayer::new(BODY_LIMIT)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds the configured port and serves until the process stops.
pub async fn serve(config: &Config) -> anyhow::Result<()> {
    let state = ProxyState::from_config(config)?;
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", config.proxy_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Dev proxy listening on http://{}", addr);
    tracing::info!("  /api -> {}", config.proxy_api_target);
    tracing::info!("  /n8n -> {}", config.proxy_n8n_target);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "ibmi-extract-proxy",
        })),
    )
}

async fn forward_api(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    forward(&state.client, &state.api_target, "/api", req)
        .await
        .into_response()
}

async fn forward_n8n(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    forward(&state.client, &state.n8n_target, "/n8n", req)
        .await
        .into_response()
}

/// Maps `/api/extract?format=csv` to `<target>/extract?format=csv`.
pub fn upstream_url(target: &str, prefix: &str, path: &str, query: Option<&str>) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    let mut url = format!("{}{}", target, rest);
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove(header::CONTENT_LENGTH);
}

async fn forward(
    client: &reqwest::Client,
    target: &str,
    prefix: &str,
    req: Request,
) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let url = upstream_url(target, prefix, parts.uri.path(), parts.uri.query());
    tracing::debug!("{} {} -> {}", parts.method, parts.uri, url);

    // Chunked bodies carry no length for the limit layer to reject up front
    let body = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Rejecting request body for {}: {}", url, e);
            return Ok((
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"detail": "Request body too large"})),
            )
                .into_response());
        }
    };

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    let upstream = client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout
            } else {
                AppError::Transport(format!("{}: {}", url, e))
            }
        })?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
