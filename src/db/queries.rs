use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{IngestedCoordinate, NewPoint, Point};
use super::store::{ForecastHourFilter, InsertOutcome, PointFilter};

/// Rows per INSERT statement. Each row binds 11 parameters, keeping a chunk
/// well below Postgres' 65535 bind-parameter limit.
const INSERT_CHUNK_SIZE: usize = 1000;

const POINT_COLUMNS: &str = "id, latitude, longitude, forecast_time, step_length, value, \
     name, threshold, sitrep, analysis_date, extra, created_at";

/// Start a `SELECT ... FROM points WHERE ...` for the given filter.
fn select_points<'a>(filter: &'a PointFilter) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {POINT_COLUMNS} FROM points WHERE latitude = "));
    qb.push_bind(filter.latitude);
    qb.push(" AND longitude = ");
    qb.push_bind(filter.longitude);

    match filter.forecast_hours {
        ForecastHourFilter::Any => {}
        ForecastHourFilter::Exact(fh) => {
            qb.push(" AND forecast_time = ");
            qb.push_bind(fh);
        }
        ForecastHourFilter::Range { min, max } => {
            qb.push(" AND forecast_time BETWEEN ");
            qb.push_bind(min);
            qb.push(" AND ");
            qb.push_bind(max);
        }
    }
    qb
}

/// Get all points matching a filter, ordered by sitrep, name, forecast_time.
pub async fn find_points(pool: &PgPool, filter: &PointFilter) -> Result<Vec<Point>, sqlx::Error> {
    let mut qb = select_points(filter);
    qb.push(" ORDER BY sitrep NULLS FIRST, name, forecast_time");
    qb.build_query_as::<Point>().fetch_all(pool).await
}

/// Get the most recent point matching a filter.
pub async fn find_latest_point(
    pool: &PgPool,
    filter: &PointFilter,
) -> Result<Option<Point>, sqlx::Error> {
    let mut qb = select_points(filter);
    qb.push(" ORDER BY analysis_date DESC NULLS LAST, forecast_time ASC LIMIT 1");
    qb.build_query_as::<Point>().fetch_optional(pool).await
}

/// Bulk-insert points, skipping rows that violate the uniqueness constraint.
///
/// Inserts are unordered: a duplicate row never blocks its siblings.
pub async fn insert_points(pool: &PgPool, rows: &[NewPoint]) -> Result<InsertOutcome, sqlx::Error> {
    let mut outcome = InsertOutcome::default();

    for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO points (id, latitude, longitude, forecast_time, step_length, value, \
             name, threshold, sitrep, analysis_date, extra) ",
        );
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(Uuid::new_v4())
                .push_bind(row.latitude)
                .push_bind(row.longitude)
                .push_bind(row.forecast_time)
                .push_bind(row.step_length)
                .push_bind(row.value)
                .push_bind(&row.name)
                .push_bind(&row.threshold)
                .push_bind(&row.sitrep)
                .push_bind(&row.analysis_date)
                .push_bind(&row.extra);
        });
        qb.push(" ON CONFLICT ON CONSTRAINT points_unique_sample DO NOTHING");

        let result = qb.build().execute(pool).await?;
        let inserted = result.rows_affected();
        outcome.merge(InsertOutcome {
            inserted,
            duplicates: chunk.len() as u64 - inserted,
        });
    }

    Ok(outcome)
}

/// Record that extraction output for a coordinate has been imported.
/// `file_count` only grows when the import added rows.
pub async fn upsert_ingested_coordinate(
    pool: &PgPool,
    latitude: Decimal,
    longitude: Decimal,
    sitrep: Option<&str>,
    added_rows: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ingested_coordinates (latitude, longitude, last_sitrep)
         VALUES ($1, $2, $3)
         ON CONFLICT (latitude, longitude) DO UPDATE SET
             last_sitrep = COALESCE(EXCLUDED.last_sitrep, ingested_coordinates.last_sitrep),
             last_ingested_at = NOW(),
             file_count = ingested_coordinates.file_count + CASE WHEN $4 THEN 1 ELSE 0 END",
    )
    .bind(latitude)
    .bind(longitude)
    .bind(sitrep)
    .bind(added_rows)
    .execute(pool)
    .await?;
    Ok(())
}

/// Whether any extraction output has ever been imported for a coordinate.
pub async fn is_coordinate_ingested(
    pool: &PgPool,
    latitude: Decimal,
    longitude: Decimal,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (
             SELECT 1 FROM ingested_coordinates WHERE latitude = $1 AND longitude = $2
         )",
    )
    .bind(latitude)
    .bind(longitude)
    .fetch_one(pool)
    .await
}

/// List ingested coordinates, most recently ingested first.
///
/// The sitrep filter is a case-folded equality match, never a pattern.
pub async fn list_ingested_coordinates(
    pool: &PgPool,
    sitrep: Option<&str>,
) -> Result<Vec<IngestedCoordinate>, sqlx::Error> {
    sqlx::query_as::<_, IngestedCoordinate>(
        "SELECT latitude, longitude, last_sitrep, first_ingested_at, last_ingested_at, file_count
         FROM ingested_coordinates
         WHERE $1::TEXT IS NULL OR LOWER(last_sitrep) = LOWER($1)
         ORDER BY last_ingested_at DESC",
    )
    .bind(sitrep)
    .fetch_all(pool)
    .await
}
