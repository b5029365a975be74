//! IBM i Extract Client Library
//!
//! This library provides the client side of the IBM i extraction gateway:
//! bearer-token storage and session handling, the gateway API client, catalog
//! autocomplete, the extraction wizard (preview, downloads, workflow forward),
//! the KPI dashboard data and the development proxy.
//!
//! # Modules
//!
//! - `api_client`: Gateway HTTP client and error normalization.
//! - `autocomplete`: Debounced schema/table suggestions.
//! - `circuit_breaker`: Circuit breaker for catalog lookups.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `export`: Download file naming and saving.
//! - `kpi`: KPI query and chart-ready series.
//! - `models`: Request/response data models.
//! - `proxy`: Development proxy for `/api` and `/n8n`.
//! - `services`: External workflow-automation webhook client.
//! - `session`: Session context holding the current token.
//! - `storage`: Key/value storage with change notifications.
//! - `token_store`: Token persistence and `Authorization` headers.
//! - `workflow`: Login → parameters extraction wizard.

pub mod api_client;
pub mod autocomplete;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod export;
pub mod kpi;
pub mod models;
pub mod proxy;
pub mod services;
pub mod session;
pub mod storage;
pub mod token_store;
pub mod workflow;
