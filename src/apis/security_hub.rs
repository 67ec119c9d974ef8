use serde_json::Value;
use std::str::FromStr;

use crate::apis::base::SourceProfile;
use crate::apis::scoring::{
    pointer_f64, pointer_str, ratio, required_str, signal, timestamp_field, ScoreCard, SignalWeight,
};
use crate::common::constants::SECURITY_HUB_FIXTURE_KEY;
use crate::common::error::RecordError;
use crate::domain::{CanonicalFinding, RawRecord, Severity, SourceType};

const WEIGHTS: &[SignalWeight] = &[
    signal("severity", 0.50),
    signal("confidence", 0.20),
    signal("criticality", 0.20),
    signal("workflow", 0.10),
];

/// AWS Security Finding Format records.
pub struct SecurityHubProfile;

impl SecurityHubProfile {
    /// Label wins over the normalized 0-100 score when both are present.
    fn severity(payload: &Value) -> Result<Severity, RecordError> {
        if let Some(label) = pointer_str(payload, "/Severity/Label") {
            return Severity::from_str(label)
                .map_err(|_| RecordError::Validation(format!("unknown severity label '{}'", label)));
        }
        let normalized = pointer_f64(payload, "/Severity/Normalized")
            .filter(|n| n.is_finite())
            .ok_or_else(|| RecordError::Validation("missing field 'Severity.Label'".into()))?;
        Ok(match normalized {
            n if n >= 90.0 => Severity::Critical,
            n if n >= 70.0 => Severity::High,
            n if n >= 40.0 => Severity::Medium,
            n if n >= 1.0 => Severity::Low,
            _ => Severity::Informational,
        })
    }

    fn workflow_strength(payload: &Value) -> f64 {
        let status = pointer_str(payload, "/Workflow/Status").or_else(|| pointer_str(payload, "/WorkflowState"));
        match status.map(str::to_ascii_uppercase).as_deref() {
            None | Some("NEW") => 1.0,
            Some("RESOLVED") | Some("SUPPRESSED") => 0.0,
            Some(_) => 0.5,
        }
    }
}

impl SourceProfile for SecurityHubProfile {
    fn source(&self) -> SourceType {
        SourceType::SecurityHub
    }

    fn fixture_key(&self) -> &'static str {
        SECURITY_HUB_FIXTURE_KEY
    }

    fn weights(&self) -> &'static [SignalWeight] {
        WEIGHTS
    }

    fn record_id(&self, payload: &Value) -> Option<String> {
        pointer_str(payload, "/Id").map(str::to_string)
    }

    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalFinding, RecordError> {
        let payload = &raw.payload;
        let id = required_str(payload, "Id")?;
        let timestamp = timestamp_field(payload, &["UpdatedAt", "CreatedAt"])?;
        let severity = Self::severity(payload)?;

        let mut card = ScoreCard::new(self.weights());
        card.add("severity", f64::from(severity.tier()) / 4.0)
            .add("confidence", ratio(pointer_f64(payload, "/Confidence").unwrap_or(0.0), 100.0))
            .add("criticality", ratio(pointer_f64(payload, "/Criticality").unwrap_or(0.0), 100.0))
            .add("workflow", Self::workflow_strength(payload));

        Ok(CanonicalFinding {
            id: id.to_string(),
            timestamp,
            source: SourceType::SecurityHub,
            severity,
            risk_score: card.score(),
            raw_ref: raw.payload_ref(),
        })
    }
}
