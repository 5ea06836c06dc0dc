//! In-memory point store for unit tests.
//!
//! Mirrors the Postgres semantics the rest of the crate relies on: the same
//! uniqueness key, the same sort order, and case-folded sitrep matching.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::models::{IngestedCoordinate, NewPoint, Point};
use super::store::{InsertOutcome, PointFilter, PointStore};

#[derive(Default)]
struct MemoryData {
    points: Vec<Point>,
    coordinates: Vec<IngestedCoordinate>,
}

#[derive(Clone, Default)]
pub struct MemoryPointStore {
    data: Arc<RwLock<MemoryData>>,
    find_calls: Arc<AtomicUsize>,
}

impl MemoryPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find` calls served so far.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn all_points(&self) -> Vec<Point> {
        self.data.read().points.clone()
    }
}

fn same_sample(a: &Point, b: &NewPoint) -> bool {
    a.latitude == b.latitude
        && a.longitude == b.longitude
        && a.sitrep == b.sitrep
        && a.analysis_date == b.analysis_date
        && a.name == b.name
        && a.threshold == b.threshold
        && a.forecast_time == b.forecast_time
        && a.step_length == b.step_length
}

fn matches(p: &Point, filter: &PointFilter) -> bool {
    p.latitude == filter.latitude
        && p.longitude == filter.longitude
        && filter.forecast_hours.matches(p.forecast_time)
}

#[async_trait]
impl PointStore for MemoryPointStore {
    async fn find(&self, filter: &PointFilter) -> Result<Vec<Point>, sqlx::Error> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let mut found: Vec<Point> = self
            .data
            .read()
            .points
            .iter()
            .filter(|p| matches(p, filter))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.sitrep
                .cmp(&b.sitrep)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.forecast_time.cmp(&b.forecast_time))
        });
        Ok(found)
    }

    async fn find_one(&self, filter: &PointFilter) -> Result<Option<Point>, sqlx::Error> {
        let data = self.data.read();
        let mut found: Vec<&Point> = data.points.iter().filter(|p| matches(p, filter)).collect();
        // analysis_date DESC NULLS LAST, forecast_time ASC
        found.sort_by(|a, b| match (&a.analysis_date, &b.analysis_date) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.forecast_time.cmp(&b.forecast_time)));
        Ok(found.first().map(|p| (*p).clone()))
    }

    async fn insert_points(&self, rows: &[NewPoint]) -> Result<InsertOutcome, sqlx::Error> {
        let mut data = self.data.write();
        let mut outcome = InsertOutcome::default();
        for row in rows {
            if data.points.iter().any(|p| same_sample(p, row)) {
                outcome.duplicates += 1;
                continue;
            }
            data.points.push(Point {
                id: Uuid::new_v4(),
                latitude: row.latitude,
                longitude: row.longitude,
                forecast_time: row.forecast_time,
                step_length: row.step_length,
                value: row.value,
                name: row.name.clone(),
                threshold: row.threshold.clone(),
                sitrep: row.sitrep.clone(),
                analysis_date: row.analysis_date.clone(),
                extra: row.extra.clone(),
                created_at: Utc::now(),
            });
            outcome.inserted += 1;
        }
        Ok(outcome)
    }

    async fn mark_ingested(
        &self,
        latitude: Decimal,
        longitude: Decimal,
        sitrep: Option<&str>,
        added_rows: bool,
    ) -> Result<(), sqlx::Error> {
        let mut data = self.data.write();
        let now = Utc::now();
        match data
            .coordinates
            .iter_mut()
            .find(|c| c.latitude == latitude && c.longitude == longitude)
        {
            Some(existing) => {
                if let Some(s) = sitrep {
                    existing.last_sitrep = Some(s.to_string());
                }
                existing.last_ingested_at = now;
                if added_rows {
                    existing.file_count += 1;
                }
            }
            None => data.coordinates.push(IngestedCoordinate {
                latitude,
                longitude,
                last_sitrep: sitrep.map(str::to_string),
                first_ingested_at: now,
                last_ingested_at: now,
                file_count: 1,
            }),
        }
        Ok(())
    }

    async fn is_ingested(&self, latitude: Decimal, longitude: Decimal) -> Result<bool, sqlx::Error> {
        Ok(self
            .data
            .read()
            .coordinates
            .iter()
            .any(|c| c.latitude == latitude && c.longitude == longitude))
    }

    async fn list_coordinates(
        &self,
        sitrep: Option<&str>,
    ) -> Result<Vec<IngestedCoordinate>, sqlx::Error> {
        let wanted = sitrep.map(str::to_lowercase);
        let mut coords: Vec<IngestedCoordinate> = self
            .data
            .read()
            .coordinates
            .iter()
            .filter(|c| match &wanted {
                None => true,
                Some(w) => c.last_sitrep.as_deref().map(str::to_lowercase).as_ref() == Some(w),
            })
            .cloned()
            .collect();
        coords.sort_by(|a, b| b.last_ingested_at.cmp(&a.last_ingested_at));
        Ok(coords)
    }

    async fn ping(&self) -> bool {
        true
    }
}
