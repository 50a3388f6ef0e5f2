//! Normalized daily observation
//!
//! Raw history documents carry every measurement as a string. The source
//! uses `""`, `"-9999"` and `"-999"` for "not measured"; those become `None`.
//! Any other value that does not parse rejects the whole document.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::date_from_millis;
use climate_durable::persistence::{lookup, Document};

const MISSING: [&str; 3] = ["", "-9999", "-999"];

/// Error type for documents that cannot be normalized
#[derive(Debug, thiserror::Error)]
pub enum ObservationError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("field {field} has unusable value {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// One day of weather at one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalWeatherObservation {
    pub location_id: i64,
    pub date: NaiveDate,
    pub fog: Option<bool>,
    pub rain: Option<bool>,
    pub snow: Option<bool>,
    pub hail: Option<bool>,
    pub thunder: Option<bool>,
    pub tornado: Option<bool>,
    pub snow_fall: Option<f64>,
    pub snow_depth: Option<f64>,
    pub mean_temp: Option<i64>,
    pub mean_pressure: Option<f64>,
    pub mean_wind_speed: Option<i64>,
    pub mean_wind_direction: Option<String>,
    pub mean_wind_direction_degrees: Option<i64>,
    pub humidity: Option<i64>,
    pub max_temp: Option<i64>,
    pub max_pressure: Option<f64>,
    pub max_wind_speed: Option<i64>,
    pub min_temp: Option<i64>,
    pub min_pressure: Option<f64>,
    pub min_wind_speed: Option<i64>,
    pub precipitation: Option<f64>,
}

impl HistoricalWeatherObservation {
    /// Normalize a raw document stored by the collector
    pub fn from_raw(raw: &Document) -> Result<Self, ObservationError> {
        let location_id = lookup(raw, "location_id")
            .and_then(Value::as_i64)
            .ok_or(ObservationError::MissingField("location_id"))?;
        let date_utc = lookup(raw, "date_utc").ok_or(ObservationError::MissingField("date_utc"))?;
        let date = date_utc
            .as_i64()
            .and_then(date_from_millis)
            .ok_or_else(|| invalid("date_utc", date_utc))?;
        let summary = lookup(raw, "history.dailysummary.0")
            .and_then(Value::as_object)
            .ok_or(ObservationError::MissingField("history.dailysummary"))?;
        let field = |name: &str| summary.get(name);

        Ok(Self {
            location_id,
            date,
            fog: parse_bool("fog", field("fog"))?,
            rain: parse_bool("rain", field("rain"))?,
            snow: parse_bool("snow", field("snow"))?,
            hail: parse_bool("hail", field("hail"))?,
            thunder: parse_bool("thunder", field("thunder"))?,
            tornado: parse_bool("tornado", field("tornado"))?,
            snow_fall: parse_float("snowfallm", field("snowfallm"))?,
            snow_depth: parse_float("snowdepthm", field("snowdepthm"))?,
            mean_temp: parse_int("meantempm", field("meantempm"))?,
            mean_pressure: parse_float("meanpressurem", field("meanpressurem"))?,
            mean_wind_speed: parse_int("meanwindspdm", field("meanwindspdm"))?,
            mean_wind_direction: field("meanwdire")
                .and_then(Value::as_str)
                .and_then(normalize_wind_direction),
            mean_wind_direction_degrees: parse_int("meanwdird", field("meanwdird"))?,
            humidity: parse_int("humidity", field("humidity"))?,
            max_temp: parse_int("maxtempm", field("maxtempm"))?,
            max_pressure: parse_float("maxpressurem", field("maxpressurem"))?,
            max_wind_speed: parse_int("maxwspdm", field("maxwspdm"))?,
            min_temp: parse_int("mintempm", field("mintempm"))?,
            min_pressure: parse_float("minpressurem", field("minpressurem"))?,
            min_wind_speed: parse_int("minwspdm", field("minwspdm"))?,
            precipitation: parse_float("precipm", field("precipm"))?,
        })
    }
}

/// Reduce a spelled-out direction ("North") to its initial ("N")
///
/// Abbreviations of up to three characters ("NNE") are kept as they are.
pub fn normalize_wind_direction(direction: &str) -> Option<String> {
    let direction = direction.trim();
    if direction.is_empty() {
        return None;
    }
    if direction.chars().count() > 3 {
        direction.chars().next().map(|c| c.to_uppercase().collect())
    } else {
        Some(direction.to_string())
    }
}

fn invalid(field: &'static str, value: &Value) -> ObservationError {
    ObservationError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

/// Raw scalar as trimmed text, `None` for the "not measured" markers
fn measured(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!MISSING.contains(&text.as_str())).then_some(text)
}

fn parse_bool(field: &'static str, value: Option<&Value>) -> Result<Option<bool>, ObservationError> {
    if let Some(Value::Bool(flag)) = value {
        return Ok(Some(*flag));
    }
    let Some(text) = measured(value) else {
        return Ok(None);
    };
    match text.as_str() {
        "1" | "true" | "True" => Ok(Some(true)),
        "0" | "false" | "False" => Ok(Some(false)),
        _ => Err(ObservationError::InvalidValue { field, value: text }),
    }
}

fn parse_float(field: &'static str, value: Option<&Value>) -> Result<Option<f64>, ObservationError> {
    let Some(text) = measured(value) else {
        return Ok(None);
    };
    // Trace amounts are reported as "T"
    if text.eq_ignore_ascii_case("t") {
        return Ok(Some(0.0));
    }
    text.parse::<f64>()
        .map(Some)
        .map_err(|_| ObservationError::InvalidValue { field, value: text })
}

fn parse_int(field: &'static str, value: Option<&Value>) -> Result<Option<i64>, ObservationError> {
    let Some(text) = measured(value) else {
        return Ok(None);
    };
    if let Ok(int) = text.parse::<i64>() {
        return Ok(Some(int));
    }
    match text.parse::<f64>() {
        Ok(float) if float.is_finite() => Ok(Some(float.round() as i64)),
        _ => Err(ObservationError::InvalidValue { field, value: text }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(summary: Value) -> Document {
        match json!({
            "location_id": 7,
            "date_utc": 1_499_990_400_000i64,
            "history": {"dailysummary": [summary]},
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_normalizes_summary() {
        let observation = HistoricalWeatherObservation::from_raw(&raw(json!({
            "fog": "0", "rain": "1", "snow": false, "hail": "", "thunder": "0", "tornado": "0",
            "snowfallm": "T", "snowdepthm": "-9999", "meantempm": "21", "meanpressurem": "1015.2",
            "meanwindspdm": "11", "meanwdire": "West", "meanwdird": "262", "humidity": "",
            "maxtempm": "27", "maxpressurem": "1017", "maxwspdm": "24", "mintempm": "14",
            "minpressurem": "1013", "minwspdm": "0", "precipm": "2.54"
        })))
        .expect("should normalize");

        assert_eq!(observation.location_id, 7);
        assert_eq!(observation.date, NaiveDate::from_ymd_opt(2017, 7, 14).expect("valid date"));
        assert_eq!(observation.rain, Some(true));
        assert_eq!(observation.snow, Some(false));
        assert_eq!(observation.hail, None);
        assert_eq!(observation.snow_fall, Some(0.0));
        assert_eq!(observation.snow_depth, None);
        assert_eq!(observation.mean_pressure, Some(1015.2));
        assert_eq!(observation.mean_wind_direction.as_deref(), Some("W"));
        assert_eq!(observation.humidity, None);
        assert_eq!(observation.max_pressure, Some(1017.0));
        assert_eq!(observation.precipitation, Some(2.54));
    }

    #[test]
    fn test_rejects_garbage_values() {
        let error = HistoricalWeatherObservation::from_raw(&raw(json!({"meantempm": "warm"})))
            .expect_err("should reject");
        assert!(matches!(error, ObservationError::InvalidValue { field: "meantempm", .. }));
    }

    #[test]
    fn test_requires_daily_summary() {
        let mut document = raw(json!({}));
        document.insert("history".into(), json!({"dailysummary": []}));
        assert!(matches!(
            HistoricalWeatherObservation::from_raw(&document),
            Err(ObservationError::MissingField("history.dailysummary"))
        ));
    }

    #[test]
    fn test_wind_direction() {
        assert_eq!(normalize_wind_direction("North").as_deref(), Some("N"));
        assert_eq!(normalize_wind_direction("variable").as_deref(), Some("V"));
        assert_eq!(normalize_wind_direction("NNE").as_deref(), Some("NNE"));
        assert_eq!(normalize_wind_direction(""), None);
    }
}
