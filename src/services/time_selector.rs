//! Translation of request time selectors into forecast-hour filters, and
//! model-run labelling of analysis timestamps.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use serde_json::json;

use crate::db::ForecastHourFilter;
use crate::errors::AppError;

/// Raw time selector values as they arrive on the query string.
#[derive(Debug, Clone, Default)]
pub struct RawTimeSelector {
    pub day_offset: Option<String>,
    pub hour: Option<String>,
    pub day_offset_min: Option<String>,
    pub hour_min: Option<String>,
    pub day_offset_max: Option<String>,
    pub hour_max: Option<String>,
    pub fh_min: Option<String>,
    pub fh_max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeSelectorError {
    #[error("{field} must be a number, got '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("{field} must be a whole forecast hour between 0 and {max}, got {value}")]
    InvalidForecastHour {
        field: &'static str,
        value: f64,
        max: i32,
    },

    #[error("forecast hour range is inverted: min {min} > max {max}")]
    InvertedRange { min: i32, max: i32 },
}

impl TimeSelectorError {
    /// Values echoed back to the client.
    pub fn details(&self) -> serde_json::Value {
        match self {
            TimeSelectorError::InvalidNumber { field, value } => {
                json!({ "field": field, "value": value })
            }
            TimeSelectorError::InvalidForecastHour { field, value, max } => {
                json!({ "field": field, "value": number_json(*value), "max": max })
            }
            TimeSelectorError::InvertedRange { min, max } => json!({ "min": min, "max": max }),
        }
    }
}

impl From<TimeSelectorError> for AppError {
    fn from(err: TimeSelectorError) -> Self {
        AppError::Validation {
            details: err.details(),
            message: err.to_string(),
        }
    }
}

/// Whole values serialize as integers so `72` doesn't come back as `72.0`.
fn number_json(v: f64) -> serde_json::Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, TimeSelectorError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TimeSelectorError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

fn check_hour(field: &'static str, value: f64, max_hour: i32) -> Result<i32, TimeSelectorError> {
    if value.fract() != 0.0 || value < 0.0 || value > max_hour as f64 {
        return Err(TimeSelectorError::InvalidForecastHour {
            field,
            value,
            max: max_hour,
        });
    }
    Ok(value as i32)
}

fn day_hour(
    field: &'static str,
    (day_field, day): (&'static str, &str),
    (hour_field, hour): (&'static str, &str),
    max_hour: i32,
) -> Result<i32, TimeSelectorError> {
    let day = parse_number(day_field, day)?;
    let hour = parse_number(hour_field, hour)?;
    check_hour(field, day * 24.0 + hour, max_hour)
}

fn range(min: i32, max: i32) -> Result<ForecastHourFilter, TimeSelectorError> {
    if min > max {
        return Err(TimeSelectorError::InvertedRange { min, max });
    }
    Ok(ForecastHourFilter::Range { min, max })
}

/// Resolve the request's time selector into a forecast-hour filter.
///
/// Precedence: a full day/hour range, then a raw `fh_min`/`fh_max` range,
/// then an exact day/hour, otherwise no filter. Values outside
/// `[0, max_hour]` are rejected rather than clamped.
pub fn resolve_forecast_hours(
    raw: &RawTimeSelector,
    max_hour: i32,
) -> Result<ForecastHourFilter, TimeSelectorError> {
    if let (Some(d_min), Some(h_min), Some(d_max), Some(h_max)) = (
        present(&raw.day_offset_min),
        present(&raw.hour_min),
        present(&raw.day_offset_max),
        present(&raw.hour_max),
    ) {
        let min = day_hour(
            "forecast_hour_min",
            ("dayOffset_min", d_min),
            ("hour_min", h_min),
            max_hour,
        )?;
        let max = day_hour(
            "forecast_hour_max",
            ("dayOffset_max", d_max),
            ("hour_max", h_max),
            max_hour,
        )?;
        return range(min, max);
    }

    if let (Some(fh_min), Some(fh_max)) = (present(&raw.fh_min), present(&raw.fh_max)) {
        let min = check_hour("fh_min", parse_number("fh_min", fh_min)?, max_hour)?;
        let max = check_hour("fh_max", parse_number("fh_max", fh_max)?, max_hour)?;
        return range(min, max);
    }

    if let (Some(day), Some(hour)) = (present(&raw.day_offset), present(&raw.hour)) {
        let fh = day_hour("forecast_hour", ("dayOffset", day), ("hour", hour), max_hour)?;
        return Ok(ForecastHourFilter::Exact(fh));
    }

    Ok(ForecastHourFilter::Any)
}

/// Synoptic cycle for a UTC hour of day.
pub fn label_for_hour(hour: u32) -> &'static str {
    match hour {
        0..=5 => "00z",
        6..=11 => "06z",
        12..=17 => "12z",
        _ => "18z",
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

fn analysis_hour(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc().hour());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.hour());
        }
    }
    // YYYYMMDDHH
    if raw.len() == 10 && raw.bytes().all(|b| b.is_ascii_digit()) {
        NaiveDate::parse_from_str(&raw[..8], "%Y%m%d").ok()?;
        let hour: u32 = raw[8..].parse().ok()?;
        return (hour < 24).then_some(hour);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(|_| 0)
}

/// Model-run label (`00z`/`06z`/`12z`/`18z`) for an analysis timestamp.
pub fn model_run_label(analysis_date: &str) -> Option<&'static str> {
    analysis_hour(analysis_date).map(label_for_hour)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(day: &str, hour: &str) -> RawTimeSelector {
        RawTimeSelector {
            day_offset: Some(day.to_string()),
            hour: Some(hour.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_covers_two_days() {
        for d in 0..=1 {
            for h in 0..=23 {
                let sel = exact(&d.to_string(), &h.to_string());
                assert_eq!(
                    resolve_forecast_hours(&sel, 48),
                    Ok(ForecastHourFilter::Exact(d * 24 + h))
                );
            }
        }
    }

    #[test]
    fn test_no_selector_is_any() {
        let sel = RawTimeSelector::default();
        assert_eq!(resolve_forecast_hours(&sel, 48), Ok(ForecastHourFilter::Any));
    }

    #[test]
    fn test_empty_strings_count_as_absent() {
        let sel = exact("", "5");
        assert_eq!(resolve_forecast_hours(&sel, 48), Ok(ForecastHourFilter::Any));
    }

    #[test]
    fn test_out_of_range_rejected_not_clamped() {
        let err = resolve_forecast_hours(&exact("3", "0"), 48).unwrap_err();
        assert_eq!(
            err,
            TimeSelectorError::InvalidForecastHour {
                field: "forecast_hour",
                value: 72.0,
                max: 48
            }
        );
        assert_eq!(err.details()["value"], json!(72));
    }

    #[test]
    fn test_negative_hour_rejected() {
        assert!(resolve_forecast_hours(&exact("0", "-1"), 48).is_err());
    }

    #[test]
    fn test_fractional_hour_rejected() {
        let err = resolve_forecast_hours(&exact("0", "5.5"), 48).unwrap_err();
        assert_eq!(err.details()["value"], json!(5.5));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = resolve_forecast_hours(&exact("today", "5"), 48).unwrap_err();
        assert_eq!(
            err,
            TimeSelectorError::InvalidNumber {
                field: "dayOffset",
                value: "today".to_string()
            }
        );
    }

    #[test]
    fn test_day_hour_range() {
        let sel = RawTimeSelector {
            day_offset_min: Some("0".into()),
            hour_min: Some("6".into()),
            day_offset_max: Some("1".into()),
            hour_max: Some("3".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_forecast_hours(&sel, 48),
            Ok(ForecastHourFilter::Range { min: 6, max: 27 })
        );
    }

    #[test]
    fn test_fh_range_inverted() {
        let sel = RawTimeSelector {
            fh_min: Some("10".into()),
            fh_max: Some("5".into()),
            ..Default::default()
        };
        let err = resolve_forecast_hours(&sel, 48).unwrap_err();
        assert_eq!(err, TimeSelectorError::InvertedRange { min: 10, max: 5 });
        assert_eq!(err.details(), json!({ "min": 10, "max": 5 }));
    }

    #[test]
    fn test_range_takes_precedence_over_exact() {
        let sel = RawTimeSelector {
            day_offset: Some("0".into()),
            hour: Some("5".into()),
            fh_min: Some("1".into()),
            fh_max: Some("2".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_forecast_hours(&sel, 48),
            Ok(ForecastHourFilter::Range { min: 1, max: 2 })
        );
    }

    #[test]
    fn test_partial_day_range_falls_through() {
        let sel = RawTimeSelector {
            day_offset_min: Some("0".into()),
            hour_min: Some("6".into()),
            day_offset: Some("0".into()),
            hour: Some("7".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_forecast_hours(&sel, 48),
            Ok(ForecastHourFilter::Exact(7))
        );
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: AppError = TimeSelectorError::InvertedRange { min: 10, max: 5 }.into();
        match err {
            AppError::Validation { details, .. } => {
                assert_eq!(details, json!({ "min": 10, "max": 5 }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_model_run_labels() {
        assert_eq!(model_run_label("2024-06-01T05:00:00Z"), Some("00z"));
        assert_eq!(model_run_label("2024-06-01 11:00"), Some("06z"));
        assert_eq!(model_run_label("2024-06-01T17:59:59"), Some("12z"));
        assert_eq!(model_run_label("2024060123"), Some("18z"));
    }

    #[test]
    fn test_model_run_offset_converted_to_utc() {
        assert_eq!(model_run_label("2024-06-01T02:00:00+04:00"), Some("18z"));
    }

    #[test]
    fn test_model_run_date_only_is_midnight() {
        assert_eq!(model_run_label("2024-06-01"), Some("00z"));
    }

    #[test]
    fn test_model_run_unparseable() {
        assert_eq!(model_run_label("yesterday"), None);
        assert_eq!(model_run_label("2024060199"), None);
        assert_eq!(model_run_label(""), None);
    }
}
