use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Risk classification for a privilege or a set of privileges.
///
/// `None` is only ever stored for snapshots whose unused set is empty; the
/// classifier itself reports empty sets as `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "NONE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRiskLevelError {
    value: String,
}

impl std::fmt::Display for ParseRiskLevelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown risk level {:?}", self.value)
    }
}

impl std::error::Error for ParseRiskLevelError {}

impl std::str::FromStr for RiskLevel {
    type Err = ParseRiskLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(RiskLevel::None),
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            _ => Err(ParseRiskLevelError {
                value: s.to_string(),
            }),
        }
    }
}

/// An IAM identity together with its effective allowed privileges.
///
/// Wildcards like `s3:*` or `*` are stored literally; they are never expanded
/// at scrape time. Matching against observations happens in the correlation
/// engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityGrants {
    pub name: String,
    pub arn: String,
    pub privileges: Vec<String>,
}

/// A single privilege observation distilled from one span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub identity: String,
    pub privilege: String,
    pub call_count: i64,
}

/// Snapshot of one identity's privilege analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analyzed_at: DateTime<Utc>,
    pub identity: String,
    pub assigned: Vec<String>,
    pub used: Vec<String>,
    pub unused: Vec<String>,
    pub risk_level: RiskLevel,
}

/// Produces `service:Operation` from raw span attributes. The service part is
/// lowercased; the operation keeps its original casing.
pub fn privilege_from_parts(service: &str, operation: &str) -> String {
    format!("{}:{}", service.to_lowercase(), operation)
}

/// Lowercases the service prefix (before `:`) of an action, preserving the
/// action's casing. Bare wildcards lowercase entirely.
/// e.g. `S3:GetObject` → `s3:GetObject`, `*` → `*`.
pub fn normalize_action(action: &str) -> String {
    match action.split_once(':') {
        Some((service, rest)) => format!("{}:{}", service.to_lowercase(), rest),
        None => action.to_lowercase(),
    }
}

/// Splits a privilege into `(service, action)`, or `None` when there is no
/// `:` separator (bare wildcards).
pub fn split_privilege(privilege: &str) -> Option<(&str, &str)> {
    privilege.split_once(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn normalize_action_lowercases_service_only() {
        assert_eq!(normalize_action("S3:GetObject"), "s3:GetObject");
        assert_eq!(
            normalize_action("ec2:DescribeInstances"),
            "ec2:DescribeInstances"
        );
        assert_eq!(normalize_action("IAM:*"), "iam:*");
        assert_eq!(normalize_action("*"), "*");
    }

    #[test]
    fn privilege_from_parts_preserves_operation_case() {
        assert_eq!(privilege_from_parts("S3", "GetObject"), "s3:GetObject");
        assert_eq!(privilege_from_parts("Lambda", "Invoke"), "lambda:Invoke");
    }

    #[test]
    fn split_privilege_handles_wildcards() {
        assert_eq!(split_privilege("s3:GetObject"), Some(("s3", "GetObject")));
        assert_eq!(split_privilege("s3:*"), Some(("s3", "*")));
        assert_eq!(split_privilege("*"), None);
    }

    #[test]
    fn risk_level_round_trips_through_str() {
        for level in [
            RiskLevel::None,
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
        ] {
            assert_eq!(RiskLevel::from_str(level.as_str()).unwrap(), level);
        }
        assert!(RiskLevel::from_str("CRITICAL").is_err());
    }

    #[test]
    fn risk_level_serializes_uppercase() {
        let json = serde_json::to_string(&RiskLevel::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }
}
