//! Cache-fallback orchestration for point queries.
//!
//! A query is answered from the store when possible. On a miss for a
//! coordinate that has never been ingested, the extraction program runs once,
//! its output is imported, and the store is queried again.

use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::Point;
use crate::db::{ForecastHourFilter, PointFilter, PointStore};
use crate::services::extraction::{ExtractionError, Extractor};
use crate::services::importer::{self, ImportError};
use crate::services::progress::{ProgressHandle, ProgressRegistry, RunGuard};

/// Share of a run's progress given to the extraction subprocess.
const EXTRACTION_BAND: (u8, u8) = (0, 80);
const IMPORTED_PERCENT: u8 = 90;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error("Import failed: {0}")]
    Import(#[from] ImportError),
    #[error("No data after processing for {latitude},{longitude}")]
    NoDataAfterProcessing { latitude: Decimal, longitude: Decimal },
}

impl PipelineError {
    /// Message safe to return to clients; subprocess output stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Store(_) => "Internal database error".to_string(),
            PipelineError::Extraction(ExtractionError::TimedOut { .. }) => {
                "Data extraction timed out".to_string()
            }
            PipelineError::Extraction(_) => "Data extraction failed".to_string(),
            PipelineError::Import(_) => "Failed to import extracted data".to_string(),
            PipelineError::NoDataAfterProcessing { .. } => "No data after processing".to_string(),
        }
    }
}

/// A coordinate plus forecast-hour constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointQuery {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub forecast_hours: ForecastHourFilter,
}

impl PointQuery {
    fn filter(&self) -> PointFilter {
        PointFilter {
            latitude: self.latitude,
            longitude: self.longitude,
            forecast_hours: self.forecast_hours,
        }
    }
}

/// How a query was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Rows were already stored.
    Hit,
    /// Coordinate was ingested before; nothing matches the time filter.
    Warm,
    /// Extraction ran and rows were imported.
    Regenerated,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Warm => "warm",
            CacheStatus::Regenerated => "regenerated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointsOutcome {
    pub points: Vec<Point>,
    pub status: CacheStatus,
    /// Set whenever the extraction pipeline ran.
    pub run_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct PointPipeline {
    store: Arc<dyn PointStore>,
    extractor: Arc<dyn Extractor>,
    progress: ProgressRegistry,
    data_dirs: Vec<PathBuf>,
}

impl PointPipeline {
    pub fn new(
        store: Arc<dyn PointStore>,
        extractor: Arc<dyn Extractor>,
        progress: ProgressRegistry,
        data_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            store,
            extractor,
            progress,
            data_dirs,
        }
    }

    /// Answer a point query, regenerating the data at most once.
    pub async fn fetch_points(
        &self,
        query: &PointQuery,
        run_id: Option<Uuid>,
    ) -> Result<PointsOutcome, PipelineError> {
        let filter = query.filter();
        let points = self.store.find(&filter).await?;
        if !points.is_empty() {
            tracing::debug!(
                lat = %query.latitude,
                lon = %query.longitude,
                count = points.len(),
                "Cache hit"
            );
            return Ok(PointsOutcome {
                points,
                status: CacheStatus::Hit,
                run_id: None,
            });
        }

        if self
            .store
            .is_ingested(query.latitude, query.longitude)
            .await?
        {
            tracing::debug!(
                lat = %query.latitude,
                lon = %query.longitude,
                "Coordinate already ingested, nothing matches the time filter"
            );
            return Ok(PointsOutcome {
                points,
                status: CacheStatus::Warm,
                run_id: None,
            });
        }

        let run = RunGuard::new(self.progress.start_run(run_id));
        let run_id = run.handle().run_id();
        tracing::info!(
            run_id = %run_id,
            lat = %query.latitude,
            lon = %query.longitude,
            "No cached data, running extraction"
        );
        match self.regenerate(query, run.handle()).await {
            Ok(points) => {
                run.succeed();
                Ok(PointsOutcome {
                    points,
                    status: CacheStatus::Regenerated,
                    run_id: Some(run_id),
                })
            }
            Err(e) => {
                run.fail(e.public_message());
                Err(e)
            }
        }
    }

    async fn regenerate(
        &self,
        query: &PointQuery,
        handle: &ProgressHandle,
    ) -> Result<Vec<Point>, PipelineError> {
        let (low, high) = EXTRACTION_BAND;
        self.extractor
            .extract(query.latitude, query.longitude, handle.sink(low, high))
            .await?;

        let summary =
            importer::import_from_candidates(self.store.as_ref(), &self.data_dirs).await?;
        tracing::info!(
            run_id = %handle.run_id(),
            files = summary.files_imported,
            inserted = summary.rows_inserted,
            "Imported extraction output"
        );
        handle.update(IMPORTED_PERCENT);

        let points = self.store.find(&query.filter()).await?;
        if points.is_empty() {
            return Err(PipelineError::NoDataAfterProcessing {
                latitude: query.latitude,
                longitude: query.longitude,
            });
        }
        Ok(points)
    }
}
