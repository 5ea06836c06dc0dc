//! Point store abstraction.
//!
//! The orchestrator and importer only see [`PointStore`]; production uses the
//! PostgreSQL-backed [`PgPointStore`], tests use the in-memory store in
//! `db::memory`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::models::{IngestedCoordinate, NewPoint, Point};
use super::queries;

/// Forecast-hour constraint applied to a point query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastHourFilter {
    /// No time filter: the full stored history for the coordinate.
    Any,
    Exact(i32),
    /// Inclusive on both ends.
    Range { min: i32, max: i32 },
}

impl ForecastHourFilter {
    pub fn matches(&self, forecast_time: i32) -> bool {
        match *self {
            ForecastHourFilter::Any => true,
            ForecastHourFilter::Exact(fh) => forecast_time == fh,
            ForecastHourFilter::Range { min, max } => (min..=max).contains(&forecast_time),
        }
    }
}

/// Exact-coordinate filter with an optional forecast-hour constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointFilter {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub forecast_hours: ForecastHourFilter,
}

/// Result of an unordered bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Rows rejected by the uniqueness constraint.
    pub duplicates: u64,
}

impl InsertOutcome {
    pub fn merge(&mut self, other: InsertOutcome) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
    }
}

#[async_trait]
pub trait PointStore: Send + Sync {
    /// All matching points, ordered by sitrep, name, then forecast hour.
    async fn find(&self, filter: &PointFilter) -> Result<Vec<Point>, sqlx::Error>;

    /// The most recent matching point (latest analysis date, then lowest hour).
    async fn find_one(&self, filter: &PointFilter) -> Result<Option<Point>, sqlx::Error>;

    /// Insert rows, skipping any that collide with an existing sample.
    async fn insert_points(&self, rows: &[NewPoint]) -> Result<InsertOutcome, sqlx::Error>;

    /// Mark a coordinate as ingested. Re-imports that add no rows refresh the
    /// marker without counting another file.
    async fn mark_ingested(
        &self,
        latitude: Decimal,
        longitude: Decimal,
        sitrep: Option<&str>,
        added_rows: bool,
    ) -> Result<(), sqlx::Error>;

    async fn is_ingested(&self, latitude: Decimal, longitude: Decimal) -> Result<bool, sqlx::Error>;

    /// Ingested coordinates, optionally restricted to a sitrep (case-insensitive).
    async fn list_coordinates(
        &self,
        sitrep: Option<&str>,
    ) -> Result<Vec<IngestedCoordinate>, sqlx::Error>;

    /// Whether the backing store is reachable.
    async fn ping(&self) -> bool;
}

/// PostgreSQL-backed point store.
#[derive(Debug, Clone)]
pub struct PgPointStore {
    pool: PgPool,
}

impl PgPointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PointStore for PgPointStore {
    async fn find(&self, filter: &PointFilter) -> Result<Vec<Point>, sqlx::Error> {
        queries::find_points(&self.pool, filter).await
    }

    async fn find_one(&self, filter: &PointFilter) -> Result<Option<Point>, sqlx::Error> {
        queries::find_latest_point(&self.pool, filter).await
    }

    async fn insert_points(&self, rows: &[NewPoint]) -> Result<InsertOutcome, sqlx::Error> {
        queries::insert_points(&self.pool, rows).await
    }

    async fn mark_ingested(
        &self,
        latitude: Decimal,
        longitude: Decimal,
        sitrep: Option<&str>,
        added_rows: bool,
    ) -> Result<(), sqlx::Error> {
        queries::upsert_ingested_coordinate(&self.pool, latitude, longitude, sitrep, added_rows)
            .await
    }

    async fn is_ingested(&self, latitude: Decimal, longitude: Decimal) -> Result<bool, sqlx::Error> {
        queries::is_coordinate_ingested(&self.pool, latitude, longitude).await
    }

    async fn list_coordinates(
        &self,
        sitrep: Option<&str>,
    ) -> Result<Vec<IngestedCoordinate>, sqlx::Error> {
        queries::list_ingested_coordinates(&self.pool, sitrep).await
    }

    async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_filter_matches_only_that_hour() {
        let f = ForecastHourFilter::Exact(5);
        assert!(f.matches(5));
        assert!(!f.matches(4));
        assert!(!f.matches(6));
    }

    #[test]
    fn test_range_filter_is_inclusive() {
        let f = ForecastHourFilter::Range { min: 5, max: 10 };
        assert!(f.matches(5));
        assert!(f.matches(10));
        assert!(!f.matches(4));
        assert!(!f.matches(11));
    }

    #[test]
    fn test_any_filter_matches_everything() {
        assert!(ForecastHourFilter::Any.matches(0));
        assert!(ForecastHourFilter::Any.matches(240));
    }

    #[test]
    fn test_insert_outcome_merge() {
        let mut total = InsertOutcome::default();
        total.merge(InsertOutcome {
            inserted: 3,
            duplicates: 1,
        });
        total.merge(InsertOutcome {
            inserted: 2,
            duplicates: 4,
        });
        assert_eq!(
            total,
            InsertOutcome {
                inserted: 5,
                duplicates: 5
            }
        );
    }
}
