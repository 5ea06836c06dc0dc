//! Point data HTTP endpoints.
//!
//! - GET /api/data?lat=&lon=&dayOffset=&hour=...
//! - GET /api/data/latest?lat=&lon=
//! - GET /api/data/coordinates?sitrep=

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::{IngestedCoordinate, Point};
use crate::db::{ForecastHourFilter, PointFilter, PointStore};
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, is_valid_coordinate, parse_decimal};
use crate::services::pipeline::{PointPipeline, PointQuery};
use crate::services::time_selector::{model_run_label, resolve_forecast_hours, RawTimeSelector};

pub const RUN_ID_HEADER: &str = "X-Progress-Run-Id";
pub const CACHE_HEADER: &str = "X-Cache";

/// Shared state for point endpoints.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PointStore>,
    pub pipeline: PointPipeline,
    pub max_forecast_hour: i32,
}

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

/// Point query. Values are taken as text so bad input is reported with the
/// offending value rather than a generic deserialization error.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DataQuery {
    /// Latitude in decimal degrees
    pub lat: Option<String>,
    /// Longitude in decimal degrees
    pub lon: Option<String>,
    /// Days after the model run (exact selector, with `hour`)
    #[serde(rename = "dayOffset")]
    pub day_offset: Option<String>,
    /// Hour within the day (exact selector, with `dayOffset`)
    pub hour: Option<String>,
    #[serde(rename = "dayOffset_min")]
    pub day_offset_min: Option<String>,
    pub hour_min: Option<String>,
    #[serde(rename = "dayOffset_max")]
    pub day_offset_max: Option<String>,
    pub hour_max: Option<String>,
    /// Lower forecast hour bound (raw hours since analysis)
    pub fh_min: Option<String>,
    /// Upper forecast hour bound (raw hours since analysis)
    pub fh_max: Option<String>,
    /// Client-chosen run id to follow on `/progress/{run_id}`
    pub progress_id: Option<String>,
}

impl DataQuery {
    fn time_selector(&self) -> RawTimeSelector {
        RawTimeSelector {
            day_offset: self.day_offset.clone(),
            hour: self.hour.clone(),
            day_offset_min: self.day_offset_min.clone(),
            hour_min: self.hour_min.clone(),
            day_offset_max: self.day_offset_max.clone(),
            hour_max: self.hour_max.clone(),
            fh_min: self.fh_min.clone(),
            fh_max: self.fh_max.clone(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LocationQuery {
    /// Latitude in decimal degrees
    pub lat: Option<String>,
    /// Longitude in decimal degrees
    pub lon: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CoordinatesQuery {
    /// Only coordinates last ingested from this sitrep (case-insensitive)
    pub sitrep: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A stored forecast sample.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PointResponse {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    /// Hours since model analysis
    pub forecast_time: i32,
    pub step_length: Option<f64>,
    pub value: Option<f64>,
    pub name: String,
    pub threshold: String,
    pub sitrep: Option<String>,
    pub analysis_date: Option<String>,
    /// Model cycle derived from `analysisDate` ("00z", "06z", "12z", "18z")
    pub model_run: Option<String>,
    /// Additional fields carried over from the extraction file
    #[schema(value_type = Object)]
    pub extra: serde_json::Value,
    pub created_at: String,
}

impl From<Point> for PointResponse {
    fn from(p: Point) -> Self {
        let model_run = p
            .analysis_date
            .as_deref()
            .and_then(model_run_label)
            .map(str::to_string);
        Self {
            id: p.id,
            latitude: dec_to_f64(p.latitude),
            longitude: dec_to_f64(p.longitude),
            forecast_time: p.forecast_time,
            step_length: p.step_length,
            value: p.value,
            name: p.name,
            threshold: p.threshold,
            sitrep: p.sitrep,
            analysis_date: p.analysis_date,
            model_run,
            extra: p.extra,
            created_at: p.created_at.to_rfc3339(),
        }
    }
}

/// A coordinate with imported extraction output.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CoordinateResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub last_sitrep: Option<String>,
    pub first_ingested_at: String,
    pub last_ingested_at: String,
    /// Number of extraction files imported for this coordinate
    pub file_count: i32,
}

impl From<IngestedCoordinate> for CoordinateResponse {
    fn from(c: IngestedCoordinate) -> Self {
        Self {
            latitude: dec_to_f64(c.latitude),
            longitude: dec_to_f64(c.longitude),
            last_sitrep: c.last_sitrep,
            first_ingested_at: c.first_ingested_at.to_rfc3339(),
            last_ingested_at: c.last_ingested_at.to_rfc3339(),
            file_count: c.file_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

fn parse_coordinate(
    lat: Option<&str>,
    lon: Option<&str>,
) -> Result<(Decimal, Decimal), AppError> {
    let (Some(lat_raw), Some(lon_raw)) = (
        lat.map(str::trim).filter(|s| !s.is_empty()),
        lon.map(str::trim).filter(|s| !s.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Query parameters 'lat' and 'lon' are required".to_string(),
        ));
    };

    let invalid = || AppError::Validation {
        message: "Invalid coordinate".to_string(),
        details: serde_json::json!({ "lat": lat_raw, "lon": lon_raw }),
    };
    let latitude = parse_decimal(lat_raw).ok_or_else(invalid)?;
    let longitude = parse_decimal(lon_raw).ok_or_else(invalid)?;
    if !is_valid_coordinate(latitude, longitude) {
        return Err(invalid());
    }
    Ok((latitude, longitude))
}

fn parse_run_id(raw: Option<&str>) -> Result<Option<Uuid>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| AppError::Validation {
                message: "progress_id must be a UUID".to_string(),
                details: serde_json::json!({ "progress_id": s }),
            }),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Get point data for a coordinate.
///
/// Answers from the store when it has matching rows. For a coordinate that
/// has never been ingested, runs the extraction program, imports its output
/// and queries again. Follow a regeneration on `/progress/{run_id}` using the
/// id from `progress_id` or the `X-Progress-Run-Id` response header.
#[utoipa::path(
    get,
    path = "/api/data",
    tag = "Points",
    params(DataQuery),
    responses(
        (status = 200, description = "Matching points (possibly empty)", body = Vec<PointResponse>,
         headers(
             ("X-Cache" = String, description = "'hit', 'warm' or 'regenerated'"),
             ("X-Progress-Run-Id" = String, description = "Run id, set when extraction ran")
         )),
        (status = 400, description = "Missing or invalid coordinate or time selector", body = ErrorResponse),
        (status = 500, description = "Extraction pipeline failed", body = ErrorResponse),
    )
)]
pub async fn get_points(
    State(state): State<AppState>,
    Query(params): Query<DataQuery>,
) -> Result<(HeaderMap, Json<Vec<PointResponse>>), AppError> {
    let (latitude, longitude) = parse_coordinate(params.lat.as_deref(), params.lon.as_deref())?;
    let forecast_hours = resolve_forecast_hours(&params.time_selector(), state.max_forecast_hour)?;
    let run_id = parse_run_id(params.progress_id.as_deref())?;

    let query = PointQuery {
        latitude,
        longitude,
        forecast_hours,
    };
    let outcome = state.pipeline.fetch_points(&query, run_id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_HEADER, HeaderValue::from_static(outcome.status.as_str()));
    if let Some(value) = outcome
        .run_id
        .and_then(|id| HeaderValue::from_str(&id.to_string()).ok())
    {
        headers.insert(RUN_ID_HEADER, value);
    }

    let points = outcome.points.into_iter().map(PointResponse::from).collect();
    Ok((headers, Json(points)))
}

/// Get the most recent point for a coordinate.
///
/// Store lookup only; never triggers extraction.
#[utoipa::path(
    get,
    path = "/api/data/latest",
    tag = "Points",
    params(LocationQuery),
    responses(
        (status = 200, description = "Most recent point", body = PointResponse),
        (status = 400, description = "Missing or invalid coordinate", body = ErrorResponse),
        (status = 404, description = "No stored point for the coordinate", body = ErrorResponse),
    )
)]
pub async fn get_latest_point(
    State(state): State<AppState>,
    Query(params): Query<LocationQuery>,
) -> Result<Json<PointResponse>, AppError> {
    let (latitude, longitude) = parse_coordinate(params.lat.as_deref(), params.lon.as_deref())?;
    let filter = PointFilter {
        latitude,
        longitude,
        forecast_hours: ForecastHourFilter::Any,
    };
    let point = state.store.find_one(&filter).await?.ok_or_else(|| {
        AppError::NotFound(format!("No data stored for {},{}", latitude, longitude))
    })?;
    Ok(Json(point.into()))
}

/// List coordinates that have imported extraction output.
#[utoipa::path(
    get,
    path = "/api/data/coordinates",
    tag = "Points",
    params(CoordinatesQuery),
    responses(
        (status = 200, description = "Ingested coordinates, most recent first", body = Vec<CoordinateResponse>),
    )
)]
pub async fn list_coordinates(
    State(state): State<AppState>,
    Query(params): Query<CoordinatesQuery>,
) -> Result<Json<Vec<CoordinateResponse>>, AppError> {
    let sitrep = params
        .sitrep
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let coordinates = state.store.list_coordinates(sitrep).await?;
    Ok(Json(coordinates.into_iter().map(Into::into).collect()))
}
