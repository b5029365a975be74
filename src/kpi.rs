//! Sales KPI dashboard: one aggregate query mapped into chart-ready series.

use crate::api_client::ApiClient;
use crate::errors::AppError;
use crate::models::*;
use crate::session::SessionContext;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

/// Metric plotted on the charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    TotalRevenue,
    Quantity,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::TotalRevenue => "totalrev",
            Metric::Quantity => "qty",
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    /// Anything other than `qty` selects revenue.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.trim().eq_ignore_ascii_case("qty") {
            Metric::Quantity
        } else {
            Metric::TotalRevenue
        })
    }
}

/// Filter form of the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiForm {
    pub date_from: String,
    pub date_to: String,
    pub granularity: Granularity,
    pub top_dim: TopDimension,
    pub limit_top: u32,
    pub country: String,
    pub city: String,
}

impl Default for KpiForm {
    fn default() -> Self {
        Self {
            date_from: "2024-01-01".to_string(),
            date_to: "2025-12-31".to_string(),
            granularity: Granularity::Monthly,
            top_dim: TopDimension::Product,
            limit_top: 10,
            country: String::new(),
            city: String::new(),
        }
    }
}

impl KpiForm {
    /// Request body; blank country/city become `None` (sent as `null`).
    pub fn to_query(&self) -> KpiQuery {
        KpiQuery {
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            series_granularity: self.granularity,
            top_dim: self.top_dim,
            limit_top: self.limit_top,
            country: blank_to_none(&self.country),
            city: blank_to_none(&self.city),
        }
    }
}

fn blank_to_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    pub dt: String,
    pub totalrev: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopItem {
    pub label: String,
    pub totalrev: f64,
    pub qty: f64,
}

/// Chart-ready KPI data.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiSeries {
    pub timeseries: Vec<TimePoint>,
    pub top: Vec<TopItem>,
    pub metric: Metric,
    pub top_dim: TopDimension,
}

impl KpiSeries {
    pub fn empty(top_dim: TopDimension) -> Self {
        Self {
            timeseries: Vec::new(),
            top: Vec::new(),
            metric: Metric::TotalRevenue,
            top_dim,
        }
    }

    /// Maps a backend answer, filling the gaps the backend may leave.
    pub fn from_result(result: KpiResult, requested_dim: TopDimension) -> Self {
        let metric = result
            .meta
            .and_then(|m| m.metric)
            .map(|m| m.parse().unwrap_or(Metric::TotalRevenue))
            .unwrap_or(Metric::TotalRevenue);

        Self {
            timeseries: result
                .timeseries
                .into_iter()
                .map(|p| TimePoint {
                    dt: p.dt,
                    totalrev: number(p.totalrev.as_ref()),
                    qty: number(p.qty.as_ref()),
                })
                .collect(),
            top: result
                .top
                .into_iter()
                .map(|t| TopItem {
                    label: top_label(t.label.as_ref()),
                    totalrev: number(t.totalrev.as_ref()),
                    qty: number(t.qty.as_ref()),
                })
                .collect(),
            metric,
            top_dim: result.top_dim.unwrap_or(requested_dim),
        }
    }

    /// Metric to plot: the one asked for, else the one the backend reported.
    pub fn plotted_metric(&self, requested: Option<Metric>) -> Metric {
        requested.unwrap_or(self.metric)
    }

    /// `(date, value)` pairs for the line chart.
    pub fn line_points(&self, metric: Metric) -> Vec<(String, f64)> {
        self.timeseries
            .iter()
            .map(|p| (p.dt.clone(), pick(metric, p.totalrev, p.qty)))
            .collect()
    }

    /// `(label, value)` pairs for the bar chart.
    pub fn bar_points(&self, metric: Metric) -> Vec<(String, f64)> {
        self.top
            .iter()
            .map(|t| (t.label.clone(), pick(metric, t.totalrev, t.qty)))
            .collect()
    }

    /// `(label, share)` pairs for the pie chart; shares sum to 1 unless all
    /// values are zero, in which case every share is zero.
    pub fn pie_slices(&self, metric: Metric) -> Vec<(String, f64)> {
        let bars = self.bar_points(metric);
        let total: f64 = bars.iter().map(|(_, v)| v).sum();
        bars.into_iter()
            .map(|(label, v)| (label, if total > 0.0 { v / total } else { 0.0 }))
            .collect()
    }
}

fn pick(metric: Metric, totalrev: f64, qty: f64) -> f64 {
    match metric {
        Metric::TotalRevenue => totalrev,
        Metric::Quantity => qty,
    }
}

fn top_label(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(other) => cell_text(other),
    }
}

/// Missing, null or non-numeric values count as zero; numeric strings are parsed.
fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub struct KpiDashboard {
    api: ApiClient,
    session: Arc<SessionContext>,
    pub form: KpiForm,
    series: KpiSeries,
}

impl KpiDashboard {
    pub fn new(api: ApiClient, session: Arc<SessionContext>) -> Self {
        let form = KpiForm::default();
        let series = KpiSeries::empty(form.top_dim);
        Self {
            api,
            session,
            form,
            series,
        }
    }

    pub fn series(&self) -> &KpiSeries {
        &self.series
    }

    /// Runs the query for the current form.
    ///
    /// On failure the previous series are cleared before the error is returned.
    pub async fn query(&mut self) -> Result<&KpiSeries, AppError> {
        let query = self.form.to_query();
        let token = self.session.bearer();

        match self.api.query_kpis(&query, token.as_deref()).await {
            Ok(result) => {
                self.series = KpiSeries::from_result(result, self.form.top_dim);
                self.form.top_dim = self.series.top_dim;
                tracing::info!(
                    "KPIs: {} series point(s), {} top item(s)",
                    self.series.timeseries.len(),
                    self.series.top.len()
                );
                Ok(&self.series)
            }
            Err(e) => {
                tracing::error!("KPI query failed: {}", e);
                self.series = KpiSeries::empty(self.form.top_dim);
                Err(e)
            }
        }
    }
}
