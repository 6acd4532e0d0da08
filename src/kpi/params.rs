//! Lenient decoding of the free-form JSON carried on annual target records.
//!
//! Malformed content never fails a recalculation: bad entries are dropped
//! with a warning and the engine falls back to configured defaults.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::kpi::schema::DistributionProfile;
use crate::period::Period;

const LEGACY_WEEKLY_WRAPPER: &str = "weekly_json";

/// Flat `period label -> percentage` map as entered by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Value", into = "BTreeMap<String, f64>")]
pub struct RepartitionWeights(BTreeMap<String, f64>);

impl RepartitionWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn from_json_lenient(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value_lenient(&value),
            Err(err) => {
                warn!("ignoring malformed repartition weights: {err}");
                Self::default()
            }
        }
    }

    pub fn from_value_lenient(value: &Value) -> Self {
        let Some(object) = unwrap_legacy_wrapper(value) else {
            if !value.is_null() {
                warn!("repartition weights are not a JSON object, using defaults");
            }
            return Self::default();
        };
        let mut out = BTreeMap::new();
        for (key, raw) in &object {
            match to_f64(raw) {
                Some(v) if v.is_finite() => {
                    out.insert(key.clone(), v);
                }
                _ => warn!("dropping repartition weight {key}={raw}"),
            }
        }
        Self(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, f64> {
        &self.0
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    /// First entry whose key addresses `period`, if any.
    pub fn weight_for(&self, period: &Period, year: i32) -> Option<f64> {
        self.0
            .iter()
            .find(|(key, _)| period.matches_key(key, year))
            .map(|(_, v)| *v)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Value> for RepartitionWeights {
    fn from(value: Value) -> Self {
        Self::from_value_lenient(&value)
    }
}

impl From<RepartitionWeights> for BTreeMap<String, f64> {
    fn from(value: RepartitionWeights) -> Self {
        value.0
    }
}

/// The weekly repartition used to be stored as `{"weekly_json": <map or string>}`.
fn unwrap_legacy_wrapper(value: &Value) -> Option<Map<String, Value>> {
    let object = value.as_object()?;
    if object.len() == 1 {
        if let Some(inner) = object.get(LEGACY_WEEKLY_WRAPPER) {
            return match inner {
                Value::Object(map) => Some(map.clone()),
                Value::String(s) => serde_json::from_str::<Value>(s)
                    .ok()
                    .and_then(|v| v.as_object().cloned()),
                _ => None,
            };
        }
    }
    Some(object.clone())
}

/// A date-ranged override applied after the base shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetEvent {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub addition: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

impl TargetEvent {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, multiplier: f64, addition: f64) -> Self {
        Self {
            start_date,
            end_date,
            multiplier,
            addition,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "Value")]
pub struct ProfileParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<f64>,
    pub decreasing: bool,
    pub valley: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday_bias: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_profile: Option<DistributionProfile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<TargetEvent>,
}

impl ProfileParams {
    pub fn from_json_lenient(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value_lenient(&value),
            Err(err) => {
                warn!("ignoring malformed profile params: {err}");
                Self::default()
            }
        }
    }

    pub fn from_value_lenient(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            if !value.is_null() {
                warn!("profile params are not a JSON object, using defaults");
            }
            return Self::default();
        };

        let base_profile = object.get("base_profile").and_then(|v| {
            let parsed = v
                .as_str()
                .and_then(|s| DistributionProfile::from_str(s).ok());
            if parsed.is_none() {
                warn!("ignoring unknown base_profile {v}");
            }
            parsed
        });

        Self {
            amplitude: finite_field(object, "amplitude"),
            phase: finite_field(object, "phase"),
            decreasing: bool_field(object, "decreasing"),
            valley: bool_field(object, "valley"),
            weekday_bias: finite_field(object, "weekday_bias"),
            initial_factor: finite_field(object, "initial_factor"),
            final_factor: finite_field(object, "final_factor"),
            base_profile,
            events: object.get("events").map(parse_events).unwrap_or_default(),
        }
    }

    pub fn with_events(mut self, events: Vec<TargetEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Value> for ProfileParams {
    fn from(value: Value) -> Self {
        Self::from_value_lenient(&value)
    }
}

fn parse_events(value: &Value) -> Vec<TargetEvent> {
    let Some(items) = value.as_array() else {
        warn!("profile params events is not a list, ignoring");
        return Vec::new();
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(object) = item.as_object() else {
            warn!("skipping non-object event {item}");
            continue;
        };
        let start = object.get("start_date").and_then(date_field);
        let end = object.get("end_date").and_then(date_field);
        let (Some(start_date), Some(end_date)) = (start, end) else {
            warn!("skipping event with missing or invalid dates: {item}");
            continue;
        };
        out.push(TargetEvent {
            start_date,
            end_date,
            multiplier: finite_field(object, "multiplier").unwrap_or(1.0),
            addition: finite_field(object, "addition").unwrap_or(0.0),
        });
    }
    out
}

fn date_field(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn finite_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    let raw = object.get(key)?;
    match to_f64(raw) {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            warn!("ignoring invalid profile param {key}={raw}");
            None
        }
    }
}

fn bool_field(object: &Map<String, Value>, key: &str) -> bool {
    match object.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => false,
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let sanitized = s.trim().replace([',', '%', '_', ' '], "");
            sanitized.parse::<f64>().ok()
        }
        _ => None,
    }
}
