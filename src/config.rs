use std::path::PathBuf;
use std::time::Duration;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Preferred directory holding extraction JSON output.
    pub data_dir: PathBuf,
    /// Directories tried, in order, when `data_dir` doesn't exist.
    pub data_dir_fallbacks: Vec<PathBuf>,
    pub extraction_interpreter: String,
    pub extraction_script: PathBuf,
    pub extraction_timeout: Duration,
    /// Period between SSE progress events.
    pub progress_interval: Duration,
    pub max_forecast_hour: i32,
    /// Import whatever is already in the data directory before serving.
    pub import_on_startup: bool,
    /// Explicit file or directory for the startup import, instead of the data dir.
    pub import_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        Self {
            database_url: get("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: var("PORT", "5050")
                .parse()
                .expect("PORT must be a valid u16"),
            data_dir: PathBuf::from(var("DATA_DIR", "./models/data")),
            data_dir_fallbacks: var("DATA_DIR_FALLBACKS", "./backend/models/data,./data")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            extraction_interpreter: var("EXTRACTION_INTERPRETER", "python3"),
            extraction_script: PathBuf::from(var(
                "EXTRACTION_SCRIPT",
                "./grib_to_json/all_models_to_json.py",
            )),
            extraction_timeout: Duration::from_secs(
                var("EXTRACTION_TIMEOUT_SECS", "900")
                    .parse()
                    .expect("EXTRACTION_TIMEOUT_SECS must be a whole number of seconds"),
            ),
            progress_interval: Duration::from_millis(
                var("PROGRESS_INTERVAL_MS", "500")
                    .parse()
                    .expect("PROGRESS_INTERVAL_MS must be a whole number of milliseconds"),
            ),
            max_forecast_hour: var("MAX_FORECAST_HOUR", "48")
                .parse()
                .expect("MAX_FORECAST_HOUR must be an integer"),
            import_on_startup: matches!(
                var("IMPORT_ON_STARTUP", "false").to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            import_path: get("IMPORT_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            log_format: if var("LOG_FORMAT", "text").eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
        }
    }

    /// The preferred data directory followed by its fallbacks.
    pub fn data_dir_candidates(&self) -> Vec<PathBuf> {
        std::iter::once(self.data_dir.clone())
            .chain(self.data_dir_fallbacks.iter().cloned())
            .collect()
    }
}
