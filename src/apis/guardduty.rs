use serde_json::Value;

use crate::apis::base::SourceProfile;
use crate::apis::scoring::{
    is_external_ip, log_ratio, pointer_f64, pointer_str, ratio, required_str, signal, timestamp_field,
    ScoreCard, SignalWeight,
};
use crate::common::constants::GUARDDUTY_FIXTURE_KEY;
use crate::common::error::RecordError;
use crate::domain::{CanonicalFinding, RawRecord, Severity, SourceType};

const WEIGHTS: &[SignalWeight] = &[
    signal("severity", 0.55),
    signal("confidence", 0.15),
    signal("external_origin", 0.20),
    signal("repetition", 0.10),
];

// Where GuardDuty puts the remote address, by action type
const REMOTE_IP_POINTERS: &[&str] = &[
    "/Service/Action/NetworkConnectionAction/RemoteIpDetails/IpAddressV4",
    "/Service/Action/AwsApiCallAction/RemoteIpDetails/IpAddressV4",
    "/Service/Action/PortProbeAction/PortProbeDetails/0/RemoteIpDetails/IpAddressV4",
    "/Service/Action/KubernetesApiCallAction/RemoteIpDetails/IpAddressV4",
];

/// GuardDuty findings: numeric severity on a 0-10 scale.
pub struct GuardDutyProfile;

impl GuardDutyProfile {
    fn severity_label(severity: f64) -> Severity {
        match severity {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s >= 1.0 => Severity::Low,
            _ => Severity::Informational,
        }
    }
}

impl SourceProfile for GuardDutyProfile {
    fn source(&self) -> SourceType {
        SourceType::GuardDuty
    }

    fn fixture_key(&self) -> &'static str {
        GUARDDUTY_FIXTURE_KEY
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
        let severity = pointer_f64(payload, "/Severity")
            .filter(|s| s.is_finite())
            .ok_or_else(|| RecordError::Validation("missing numeric field 'Severity'".into()))?;

        let external = REMOTE_IP_POINTERS
            .iter()
            .filter_map(|p| pointer_str(payload, p))
            .any(is_external_ip);

        let mut card = ScoreCard::new(self.weights());
        card.add("severity", ratio(severity, 10.0))
            .add("confidence", ratio(pointer_f64(payload, "/Confidence").unwrap_or(0.0), 10.0))
            .add("external_origin", if external { 1.0 } else { 0.0 })
            .add("repetition", log_ratio(pointer_f64(payload, "/Service/Count").unwrap_or(0.0), 100.0));

        Ok(CanonicalFinding {
            id: id.to_string(),
            timestamp,
            source: SourceType::GuardDuty,
            severity: Self::severity_label(severity),
            risk_score: card.score(),
            raw_ref: raw.payload_ref(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(payload: Value) -> RawRecord {
        RawRecord::new(SourceType::GuardDuty, payload)
    }

    #[test]
    fn normalizes_a_high_severity_finding() {
        let finding = GuardDutyProfile
            .normalize(&raw(json!({
                "Id": "gd-1",
                "UpdatedAt": "2024-05-01T12:00:00.000Z",
                "Severity": 8.0,
                "Confidence": 10,
                "Service": {
                    "Count": 100,
                    "Action": {"NetworkConnectionAction": {"RemoteIpDetails": {"IpAddressV4": "8.8.4.4"}}}
                }
            })))
            .unwrap();
        assert_eq!(finding.id, "gd-1");
        assert_eq!(finding.severity, Severity::High);
        // 0.55*0.8 + 0.15 + 0.20 + 0.10
        assert!((finding.risk_score - 0.89).abs() < 1e-9);
    }

    #[test]
    fn internal_origin_scores_lower() {
        let base = json!({
            "Id": "gd-2", "CreatedAt": "2024-05-01T12:00:00Z", "Severity": 5,
            "Service": {"Action": {"AwsApiCallAction": {"RemoteIpDetails": {"IpAddressV4": "10.1.2.3"}}}}
        });
        let mut external = base.clone();
        external["Service"]["Action"]["AwsApiCallAction"]["RemoteIpDetails"]["IpAddressV4"] = json!("203.0.114.9");
        let a = GuardDutyProfile.normalize(&raw(base)).unwrap();
        let b = GuardDutyProfile.normalize(&raw(external)).unwrap();
        assert!(b.risk_score > a.risk_score);
        assert_eq!(a.severity, Severity::Medium);
    }

    #[test]
    fn out_of_range_severity_is_clamped() {
        let f = GuardDutyProfile
            .normalize(&raw(json!({"Id": "x", "CreatedAt": "2024-05-01T12:00:00Z", "Severity": 400.0, "Confidence": 99})))
            .unwrap();
        assert!((0.0..=1.0).contains(&f.risk_score));
        assert_eq!(f.severity, Severity::Critical);
    }

    #[test]
    fn missing_fields_are_validation_errors() {
        assert!(matches!(
            GuardDutyProfile.normalize(&raw(json!({"CreatedAt": "2024-05-01T12:00:00Z", "Severity": 1}))),
            Err(RecordError::Validation(_))
        ));
        assert!(matches!(
            GuardDutyProfile.normalize(&raw(json!({"Id": "x", "CreatedAt": "2024-05-01T12:00:00Z"}))),
            Err(RecordError::Validation(_))
        ));
    }

    #[test]
    fn weights_cover_the_unit_interval() {
        let total: f64 = WEIGHTS.iter().map(|w| w.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
