use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// A stored forecast sample for one coordinate and forecast hour.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Point {
    pub id: Uuid,
    pub latitude: Decimal,
    pub longitude: Decimal,
    /// Hours since model analysis.
    pub forecast_time: i32,
    pub step_length: Option<f64>,
    pub value: Option<f64>,
    pub name: String,
    /// Unit-bearing condition string, e.g. "> 283.15 K".
    pub threshold: String,
    pub sitrep: Option<String>,
    /// Model analysis timestamp exactly as written in the extraction file.
    pub analysis_date: Option<String>,
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A point row stamped by the importer, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPoint {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub forecast_time: i32,
    pub step_length: Option<f64>,
    pub value: Option<f64>,
    pub name: String,
    pub threshold: String,
    pub sitrep: Option<String>,
    pub analysis_date: Option<String>,
    pub extra: serde_json::Value,
}

/// Marker for a coordinate that has had extraction output imported.
///
/// Distinguishes "never ingested" from "ingested, but nothing crossed a
/// threshold at the requested hour" when a point query comes back empty.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct IngestedCoordinate {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub last_sitrep: Option<String>,
    pub first_ingested_at: DateTime<Utc>,
    pub last_ingested_at: DateTime<Utc>,
    pub file_count: i32,
}
