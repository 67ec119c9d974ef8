use serde_json::Value;

use crate::apis::base::SourceProfile;
use crate::apis::scoring::{is_external_ip, pointer_str, required_str, signal, timestamp_field, ScoreCard, SignalWeight};
use crate::common::constants::CLOUDTRAIL_FIXTURE_KEY;
use crate::common::error::RecordError;
use crate::domain::{CanonicalFinding, RawRecord, Severity, SourceType};

const WEIGHTS: &[SignalWeight] = &[
    signal("access_error", 0.30),
    signal("throttle", 0.10),
    signal("external_origin", 0.25),
    signal("sensitive_action", 0.25),
    signal("root_identity", 0.10),
];

// Control-plane calls that change who can do what, or blind the audit trail
const SENSITIVE_EVENTS: &[&str] = &[
    "ConsoleLogin",
    "CreateAccessKey",
    "CreateUser",
    "CreateLoginProfile",
    "UpdateLoginProfile",
    "AttachUserPolicy",
    "AttachRolePolicy",
    "PutUserPolicy",
    "PutRolePolicy",
    "UpdateAssumeRolePolicy",
    "DeleteTrail",
    "StopLogging",
    "UpdateTrail",
    "PutBucketPolicy",
    "PutBucketAcl",
    "DeleteBucketPolicy",
    "DisableKey",
    "ScheduleKeyDeletion",
    "AuthorizeSecurityGroupIngress",
    "DeleteDetector",
    "DisableSecurityHub",
];

/// CloudTrail management events. There is no severity on the wire, so the
/// label is derived from the score.
pub struct CloudTrailProfile;

impl CloudTrailProfile {
    fn access_error(error_code: Option<&str>) -> f64 {
        match error_code {
            Some("AccessDenied") | Some("UnauthorizedOperation") | Some("Client.UnauthorizedOperation") => 1.0,
            Some(code) if is_throttle(code) => 0.0,
            Some(_) => 0.5,
            None => 0.0,
        }
    }
}

fn is_throttle(code: &str) -> bool {
    code.contains("Throttl") || code == "RequestLimitExceeded"
}

impl SourceProfile for CloudTrailProfile {
    fn source(&self) -> SourceType {
        SourceType::CloudTrail
    }

    fn fixture_key(&self) -> &'static str {
        CLOUDTRAIL_FIXTURE_KEY
    }

    fn weights(&self) -> &'static [SignalWeight] {
        WEIGHTS
    }

    fn record_id(&self, payload: &Value) -> Option<String> {
        pointer_str(payload, "/eventID").map(str::to_string)
    }

    fn normalize(&self, raw: &RawRecord) -> Result<CanonicalFinding, RecordError> {
        let payload = &raw.payload;
        let id = required_str(payload, "eventID")?;
        let timestamp = timestamp_field(payload, &["eventTime"])?;
        let event_name = required_str(payload, "eventName")?;
        let error_code = pointer_str(payload, "/errorCode");

        let mut card = ScoreCard::new(self.weights());
        card.add("access_error", Self::access_error(error_code))
            .add("throttle", if error_code.is_some_and(is_throttle) { 1.0 } else { 0.0 })
            .add(
                "external_origin",
                if pointer_str(payload, "/sourceIPAddress").is_some_and(is_external_ip) { 1.0 } else { 0.0 },
            )
            .add("sensitive_action", if SENSITIVE_EVENTS.contains(&event_name) { 1.0 } else { 0.0 })
            .add("root_identity", if pointer_str(payload, "/userIdentity/type") == Some("Root") { 1.0 } else { 0.0 });

        let risk_score = card.score();
        Ok(CanonicalFinding {
            id: id.to_string(),
            timestamp,
            source: SourceType::CloudTrail,
            severity: Severity::from_score(risk_score),
            risk_score,
            raw_ref: raw.payload_ref(),
        })
    }
}
