//! Minimal read-only permission sets per source.
//!
//! The same table feeds the capability probes run by the validator and the
//! setup guide handed to customers, so the two cannot drift apart.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use crate::common::constants::EXTERNAL_ID_LEN;
use crate::domain::SourceType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub action: &'static str,
    pub description: &'static str,
    /// Whether the validator exercises this action with a minimal call.
    pub probed: bool,
}

const fn permission(action: &'static str, description: &'static str, probed: bool) -> Permission {
    Permission {
        action,
        description,
        probed,
    }
}

const GUARDDUTY_PERMISSIONS: &[Permission] = &[
    permission("guardduty:ListDetectors", "Find the detector enabled in the region", true),
    permission("guardduty:GetDetector", "Confirm the detector is enabled", false),
    permission("guardduty:ListFindings", "Page through finding ids", true),
    permission("guardduty:GetFindings", "Fetch finding details", false),
];

const SECURITY_HUB_PERMISSIONS: &[Permission] = &[
    permission("securityhub:DescribeHub", "Confirm Security Hub is enabled", true),
    permission("securityhub:GetFindings", "Fetch findings in ASFF", true),
    permission("securityhub:GetEnabledStandards", "Read enabled standards for context", false),
];

const CLOUDTRAIL_PERMISSIONS: &[Permission] = &[
    permission("cloudtrail:DescribeTrails", "List trails configured in the account", true),
    permission("cloudtrail:GetTrailStatus", "Confirm a trail is logging", false),
    permission("cloudtrail:LookupEvents", "Read recent management events", true),
];

/// The minimal permission set for `source`.
pub fn permissions_for(source: SourceType) -> &'static [Permission] {
    match source {
        SourceType::GuardDuty => GUARDDUTY_PERMISSIONS,
        SourceType::SecurityHub => SECURITY_HUB_PERMISSIONS,
        SourceType::CloudTrail => CLOUDTRAIL_PERMISSIONS,
    }
}

/// The subset of `permissions_for(source)` the validator probes.
pub fn probed_permissions(source: SourceType) -> impl Iterator<Item = &'static Permission> {
    permissions_for(source).iter().filter(|p| p.probed)
}

/// Random token customers put in the `sts:ExternalId` trust condition.
pub fn generate_external_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(EXTERNAL_ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeSummary {
    pub source: SourceType,
    pub action: &'static str,
    pub description: &'static str,
}

/// Everything an operator needs to set up the cross-account role.
#[derive(Debug, Clone, Serialize)]
pub struct SetupGuide {
    pub sources: Vec<SourceType>,
    pub external_id: String,
    pub trust_policy: Value,
    pub permission_policy: Value,
    pub probes: Vec<ProbeSummary>,
}

/// Build the trust policy, permission policy and probe list for `sources`.
pub fn setup_guide(sources: &[SourceType], trusted_principal: &str, external_id: &str) -> SetupGuide {
    let mut unique_sources: Vec<SourceType> = sources.to_vec();
    unique_sources.sort();
    unique_sources.dedup();

    let actions: BTreeSet<&'static str> = unique_sources
        .iter()
        .flat_map(|s| permissions_for(*s).iter().map(|p| p.action))
        .collect();

    let probes = unique_sources
        .iter()
        .flat_map(|s| {
            probed_permissions(*s).map(move |p| ProbeSummary {
                source: *s,
                action: p.action,
                description: p.description,
            })
        })
        .collect();

    let trust_policy = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "AWS": trusted_principal },
            "Action": "sts:AssumeRole",
            "Condition": { "StringEquals": { "sts:ExternalId": external_id } }
        }]
    });

    let permission_policy = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "FindingIngestReadOnly",
            "Effect": "Allow",
            "Action": actions.into_iter().collect::<Vec<_>>(),
            "Resource": "*"
        }]
    });

    SetupGuide {
        sources: unique_sources,
        external_id: external_id.to_string(),
        trust_policy,
        permission_policy,
        probes,
    }
}
