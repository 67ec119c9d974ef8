//! Shared data shapes: source types, severity labels, raw records and the
//! canonical finding envelope handed to the downstream pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::common::constants::*;
use crate::common::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[serde(rename = "guardduty")]
    GuardDuty,
    SecurityHub,
    #[serde(rename = "cloudtrail")]
    CloudTrail,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::GuardDuty => GUARDDUTY_SOURCE,
            SourceType::SecurityHub => SECURITY_HUB_SOURCE,
            SourceType::CloudTrail => CLOUDTRAIL_SOURCE,
        }
    }

    pub fn all() -> [SourceType; 3] {
        [SourceType::GuardDuty, SourceType::SecurityHub, SourceType::CloudTrail]
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            GUARDDUTY_SOURCE => Ok(SourceType::GuardDuty),
            SECURITY_HUB_SOURCE | "securityhub" => Ok(SourceType::SecurityHub),
            CLOUDTRAIL_SOURCE => Ok(SourceType::CloudTrail),
            other => Err(IngestError::Config(format!("unknown source type '{}'", other))),
        }
    }
}

/// Severity labels shared by every source, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "INFORMATIONAL",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Position on a 0..=4 scale, used as a scoring signal.
    pub fn tier(&self) -> u8 {
        *self as u8
    }

    /// Label for a score already clamped to [0,1].
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.85 => Severity::Critical,
            s if s >= 0.65 => Severity::High,
            s if s >= 0.4 => Severity::Medium,
            s if s >= 0.15 => Severity::Low,
            _ => Severity::Informational,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INFORMATIONAL" | "INFO" => Ok(Severity::Informational),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(IngestError::Config(format!("unknown severity '{}'", other))),
        }
    }
}

/// A record exactly as the provider (or fixture) returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: SourceType,
    pub payload: Value,
}

impl RawRecord {
    pub fn new(source: SourceType, payload: Value) -> Self {
        Self { source, payload }
    }

    /// Content address of the payload. `serde_json` serializes object keys in
    /// sorted order, so equal payloads always produce the same reference.
    pub fn payload_ref(&self) -> String {
        let canonical = self.payload.to_string();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// The only shape the downstream investigation pipeline needs to accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFinding {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: SourceType,
    pub severity: Severity,
    /// Always within [0,1].
    pub risk_score: f64,
    pub raw_ref: String,
}
