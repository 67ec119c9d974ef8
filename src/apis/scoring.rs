//! Risk scoring shared by every source profile.
//!
//! A profile declares a weight table; each signal is a strength in [0,1]
//! scaled into its own band `[0, weight]`, so no signal can eat into another
//! signal's share. The sum is clamped to [0,1].

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::net::IpAddr;

use crate::common::error::RecordError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeight {
    pub signal: &'static str,
    pub weight: f64,
}

pub const fn signal(signal: &'static str, weight: f64) -> SignalWeight {
    SignalWeight { signal, weight }
}

#[derive(Debug)]
pub struct ScoreCard {
    weights: &'static [SignalWeight],
    total: f64,
}

impl ScoreCard {
    pub fn new(weights: &'static [SignalWeight]) -> Self {
        Self { weights, total: 0.0 }
    }

    /// Add `strength` of `name`. Unknown signals and non-finite strengths contribute nothing.
    pub fn add(&mut self, name: &str, strength: f64) -> &mut Self {
        let weight = self
            .weights
            .iter()
            .find(|w| w.signal == name)
            .map(|w| w.weight.max(0.0))
            .unwrap_or(0.0);
        let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 0.0 };
        self.total += (strength * weight).clamp(0.0, weight);
        self
    }

    pub fn score(&self) -> f64 {
        self.total.clamp(0.0, 1.0)
    }
}

/// Scale `value` from `[0, max]` to `[0, 1]`.
pub fn ratio(value: f64, max: f64) -> f64 {
    if !value.is_finite() || max <= 0.0 {
        return 0.0;
    }
    (value / max).clamp(0.0, 1.0)
}

/// Log-scaled strength for counters, saturating at `saturation`.
pub fn log_ratio(count: f64, saturation: f64) -> f64 {
    if !count.is_finite() || count <= 0.0 || saturation <= 0.0 {
        return 0.0;
    }
    ((1.0 + count).ln() / (1.0 + saturation).ln()).clamp(0.0, 1.0)
}

/// True for addresses routable on the public internet. Hostnames and
/// service principals (e.g. `cloudtrail.amazonaws.com`) are not external.
pub fn is_external_ip(candidate: &str) -> bool {
    match candidate.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let octets = v4.octets();
            let shared = octets[0] == 100 && (64..128).contains(&octets[1]);
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || shared)
        }
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            let unique_local = (first & 0xfe00) == 0xfc00;
            let link_local = (first & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
        Err(_) => false,
    }
}

// Field helpers for profiles

pub fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, RecordError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| RecordError::Validation(format!("missing string field '{}'", field)))
}

pub fn pointer_str<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

pub fn pointer_f64(payload: &Value, pointer: &str) -> Option<f64> {
    payload.pointer(pointer).and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

/// First present RFC 3339 timestamp among `fields`.
pub fn timestamp_field(payload: &Value, fields: &[&str]) -> Result<DateTime<Utc>, RecordError> {
    for field in fields {
        if let Some(raw) = payload.get(*field).and_then(Value::as_str) {
            return DateTime::parse_from_rfc3339(raw)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| RecordError::Validation(format!("invalid timestamp in '{}': {}", field, e)));
        }
    }
    Err(RecordError::Validation(format!(
        "missing timestamp (looked for {})",
        fields.join(", ")
    )))
}
