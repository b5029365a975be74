use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Smallest and largest row limit the gateway accepts.
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 5000;
pub const DEFAULT_LIMIT: u32 = 200;

// ============ Authentication ============

/// Credentials posted to `/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub host: String,
    pub user: String,
    pub password: String,
}

/// Successful `/login` response. Fields besides the token are kept verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============ Extraction ============

/// A row as returned by the gateway: column name to scalar value, in column order.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub library: String,
    pub table: String,
    pub limit: u32,
}

impl ExtractionRequest {
    /// Trims and upper-cases library/table and clamps the limit.
    pub fn normalized(library: &str, table: &str, limit: u32) -> Self {
        Self {
            library: library.trim().to_uppercase(),
            table: table.trim().to_uppercase(),
            limit: limit.clamp(MIN_LIMIT, MAX_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtractionResult {
    #[serde(default, deserialize_with = "lenient_count")]
    pub count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rows: Vec<Record>,
}

/// Output format of `/extract`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Json,
}

impl ExportFormat {
    /// Value of the `format` query parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_param()
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unsupported export format '{}'", other)),
        }
    }
}

/// Body of `/etl/ingest`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRequest {
    pub library: String,
    pub table: String,
    pub limit: u32,
    pub rows: Vec<Record>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestResponse {
    pub count: Option<u64>,
    pub forwarded_to: Option<String>,
}

// ============ Catalog ============

#[derive(Debug, Clone, Serialize)]
pub struct SchemaQuery {
    pub pattern: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaList {
    #[serde(default)]
    pub schemas: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableQuery {
    pub library: String,
    pub pattern: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableItem {
    pub table: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableList {
    #[serde(default)]
    pub items: Vec<TableItem>,
}

// ============ KPIs ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopDimension {
    Product,
    City,
    Country,
}

impl TopDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopDimension::Product => "product",
            TopDimension::City => "city",
            TopDimension::Country => "country",
        }
    }
}

impl FromStr for TopDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" => Ok(TopDimension::Product),
            "city" => Ok(TopDimension::City),
            "country" => Ok(TopDimension::Country),
            other => Err(format!("unknown top dimension '{}'", other)),
        }
    }
}

/// Body of `/kpis/query`. Absent filters serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiQuery {
    pub date_from: String,
    pub date_to: String,
    pub series_granularity: Granularity,
    pub top_dim: TopDimension,
    pub limit_top: u32,
    pub country: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KpiResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub timeseries: Vec<RawTimePoint>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub top: Vec<RawTopItem>,
    #[serde(default)]
    pub meta: Option<KpiMeta>,
    /// Unknown dimensions read as absent.
    #[serde(default, deserialize_with = "lenient_top_dim")]
    pub top_dim: Option<TopDimension>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KpiMeta {
    pub metric: Option<String>,
}

/// Time-series point as sent by the backend; numbers may be missing or strings.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTimePoint {
    #[serde(default, deserialize_with = "null_as_default")]
    pub dt: String,
    #[serde(default)]
    pub totalrev: Option<Value>,
    #[serde(default)]
    pub qty: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTopItem {
    /// Usually a string, but product ids may arrive as numbers.
    #[serde(default)]
    pub label: Option<Value>,
    #[serde(default)]
    pub totalrev: Option<Value>,
    #[serde(default)]
    pub qty: Option<Value>,
}

// ============ Health ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub message: String,
}

/// Renders a cell the way the preview table shows it: `null` is blank,
/// strings are unquoted, everything else is its JSON text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `null` reads as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Row counts may be `null`, fractional or numeric strings; anything unusable is 0.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let count = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    Ok(count)
}

fn lenient_top_dim<'de, D>(deserializer: D) -> Result<Option<TopDimension>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok()))
}
