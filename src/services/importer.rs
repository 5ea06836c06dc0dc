//! Model-data importer.
//!
//! Loads extraction-output JSON documents into the point store. Each document
//! carries a `metadata` header (location, sitrep, analysis date) and a `data`
//! array of rows; every row is stamped with the header fields before a bulk,
//! duplicate-tolerant insert.
//!
//! A bad file is logged and skipped. Only a missing data directory (after all
//! candidate paths are exhausted) fails the whole run.

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::models::NewPoint;
use crate::db::PointStore;
use crate::helpers::json_to_decimal;

/// Row keys that are mapped onto typed columns (or overwritten by stamping)
/// and therefore excluded from a row's `extra` payload.
const STAMPED_KEYS: &[&str] = &[
    "name",
    "threshold",
    "step_length",
    "stepLength",
    "forecast_time",
    "forecastTime",
    "value",
    "probability",
    "lat",
    "lon",
    "sitrep",
    "anal_date",
];

/// Errors that can occur while importing extraction output.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("JSON data directory not found (searched: {})", display_paths(.searched))]
    DataDirNotFound { searched: Vec<PathBuf> },
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {} as JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: metadata.location.lat/lon missing", .path.display())]
    MissingLocation { path: PathBuf },
    #[error("{}: 'data' is missing or not an array", .path.display())]
    MalformedPayload { path: PathBuf },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A parsed and stamped extraction document.
#[derive(Debug, Clone)]
pub struct ExtractionDocument {
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub sitrep: Option<String>,
    pub analysis_date: Option<String>,
    pub rows: Vec<NewPoint>,
    /// Rows dropped for lacking a name or forecast hour.
    pub skipped_rows: usize,
}

/// Per-file import result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileImportOutcome {
    pub file: PathBuf,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
    pub rows_skipped: usize,
}

/// Totals for one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub files_seen: usize,
    pub files_imported: usize,
    pub files_skipped: usize,
    pub rows_inserted: u64,
    pub rows_duplicate: u64,
}

impl ImportSummary {
    fn record(&mut self, outcome: &FileImportOutcome) {
        self.files_imported += 1;
        self.rows_inserted += outcome.rows_inserted;
        self.rows_duplicate += outcome.rows_duplicate;
    }
}

/// Pick the first candidate that is an existing directory.
pub async fn resolve_data_dir(candidates: &[PathBuf]) -> Result<PathBuf, ImportError> {
    for candidate in candidates {
        if is_kind(candidate, |m| m.is_dir()).await {
            return Ok(candidate.clone());
        }
        tracing::debug!("Data directory candidate not found: {}", candidate.display());
    }
    Err(ImportError::DataDirNotFound {
        searched: candidates.to_vec(),
    })
}

/// List `*.json` files in a directory, sorted, skipping macOS `._` sidecars.
pub async fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
    let io_err = |source| ImportError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let is_sidecar = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("._"));
        if is_json && !is_sidecar && is_kind(&path, |m| m.is_file()).await {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Follows symlinks; missing or unreadable paths are neither.
async fn is_kind(path: &Path, kind: impl Fn(&std::fs::Metadata) -> bool) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| kind(&m))
}

/// Render a scalar metadata/row value as text (strings unquoted).
fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Forecast hours must be whole numbers; `5.0` is accepted, `5.5` is not.
fn value_to_forecast_hour(v: &Value) -> Option<i32> {
    if let Some(i) = v.as_i64() {
        return i32::try_from(i).ok();
    }
    let f = value_to_f64(v)?;
    if f.is_finite() && f.fract() == 0.0 && f >= i32::MIN as f64 && f <= i32::MAX as f64 {
        Some(f as i32)
    } else {
        None
    }
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Parse an extraction document and stamp its rows with header fields.
pub fn parse_extraction_document(path: &Path, raw: &str) -> Result<ExtractionDocument, ImportError> {
    let doc: Value = serde_json::from_str(raw).map_err(|source| ImportError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let meta = doc.get("metadata");
    let location = meta.and_then(|m| m.get("location"));
    let latitude = location.and_then(|l| l.get("lat")).and_then(json_to_decimal);
    let longitude = location.and_then(|l| l.get("lon")).and_then(json_to_decimal);
    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return Err(ImportError::MissingLocation {
            path: path.to_path_buf(),
        });
    };

    let sitrep = meta.and_then(|m| m.get("sitrep")).and_then(value_to_text);
    let analysis_date = meta.and_then(|m| m.get("anal_date")).and_then(value_to_text);

    let Some(data) = doc.get("data").and_then(Value::as_array) else {
        return Err(ImportError::MalformedPayload {
            path: path.to_path_buf(),
        });
    };

    let mut rows = Vec::with_capacity(data.len());
    let mut skipped_rows = 0;
    for item in data {
        let Some(obj) = item.as_object() else {
            skipped_rows += 1;
            continue;
        };
        let name = obj.get("name").and_then(value_to_text);
        let forecast_time =
            first_present(obj, &["forecast_time", "forecastTime"]).and_then(value_to_forecast_hour);
        let (Some(name), Some(forecast_time)) = (name, forecast_time) else {
            skipped_rows += 1;
            continue;
        };

        let extra: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !STAMPED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        rows.push(NewPoint {
            latitude,
            longitude,
            forecast_time,
            step_length: first_present(obj, &["step_length", "stepLength"]).and_then(value_to_f64),
            value: first_present(obj, &["value", "probability"]).and_then(value_to_f64),
            name,
            threshold: obj
                .get("threshold")
                .and_then(value_to_text)
                .unwrap_or_default(),
            sitrep: sitrep.clone(),
            analysis_date: analysis_date.clone(),
            extra: Value::Object(extra),
        });
    }

    if skipped_rows > 0 {
        tracing::warn!(
            "{}: skipped {} rows without a name or whole forecast hour",
            path.display(),
            skipped_rows
        );
    }

    Ok(ExtractionDocument {
        latitude,
        longitude,
        sitrep,
        analysis_date,
        rows,
        skipped_rows,
    })
}

/// Import one extraction file into the store.
pub async fn import_file(
    store: &dyn PointStore,
    path: &Path,
) -> Result<FileImportOutcome, ImportError> {
    tracing::info!("Reading {}", path.display());
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let doc = parse_extraction_document(path, &raw)?;

    let mut outcome = FileImportOutcome {
        file: path.to_path_buf(),
        rows_inserted: 0,
        rows_duplicate: 0,
        rows_skipped: doc.skipped_rows,
    };

    if doc.rows.is_empty() {
        tracing::info!("No data rows inside {}", path.display());
    } else {
        let inserted = store.insert_points(&doc.rows).await?;
        outcome.rows_inserted = inserted.inserted;
        outcome.rows_duplicate = inserted.duplicates;
        tracing::info!(
            "Inserted {} points from {} (analysis {})",
            inserted.inserted,
            path.display(),
            doc.analysis_date.as_deref().unwrap_or("unknown")
        );
        if inserted.duplicates > 0 {
            tracing::warn!(
                "Duplicate entries detected & skipped in {}: {}",
                path.display(),
                inserted.duplicates
            );
        }
    }

    store
        .mark_ingested(
            doc.latitude,
            doc.longitude,
            doc.sitrep.as_deref(),
            outcome.rows_inserted > 0,
        )
        .await?;

    Ok(outcome)
}

/// Import every JSON file in a directory, skipping files that fail.
pub async fn import_dir(store: &dyn PointStore, dir: &Path) -> Result<ImportSummary, ImportError> {
    tracing::info!("Using JSON directory: {}", dir.display());
    let files = list_json_files(dir).await?;
    let mut summary = ImportSummary {
        files_seen: files.len(),
        ..Default::default()
    };

    if files.is_empty() {
        tracing::info!("No JSON files found in {}", dir.display());
        return Ok(summary);
    }

    for file in &files {
        match import_file(store, file).await {
            Ok(outcome) => summary.record(&outcome),
            Err(e @ ImportError::Database(_)) => {
                tracing::error!("Error inserting points from {}: {}", file.display(), e);
                summary.files_skipped += 1;
            }
            Err(e) => {
                tracing::warn!("Skipping {}: {}", file.display(), e);
                summary.files_skipped += 1;
            }
        }
    }

    tracing::info!(
        files = summary.files_seen,
        imported = summary.files_imported,
        skipped = summary.files_skipped,
        inserted = summary.rows_inserted,
        duplicates = summary.rows_duplicate,
        "Import complete"
    );
    Ok(summary)
}

/// Resolve the data directory from the candidate list and import it.
pub async fn import_from_candidates(
    store: &dyn PointStore,
    candidates: &[PathBuf],
) -> Result<ImportSummary, ImportError> {
    let dir = resolve_data_dir(candidates).await?;
    import_dir(store, &dir).await
}

/// Import a single explicit file, or a whole directory.
///
/// Unlike directory imports, a failure on an explicitly named file is
/// returned to the caller.
pub async fn import_path(store: &dyn PointStore, path: &Path) -> Result<ImportSummary, ImportError> {
    if is_kind(path, |m| m.is_file()).await {
        let outcome = import_file(store, path).await?;
        let mut summary = ImportSummary {
            files_seen: 1,
            ..Default::default()
        };
        summary.record(&outcome);
        Ok(summary)
    } else {
        import_dir(store, path).await
    }
}
