use std::collections::HashSet;

use privsweep_contracts::normalize_action;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    #[serde(rename = "Version", default)]
    #[allow(dead_code)]
    version: String,
    #[serde(rename = "Statement", default)]
    statement: Vec<Statement>,
}

#[derive(Debug, Deserialize)]
struct Statement {
    #[serde(rename = "Effect", default)]
    effect: String,
    #[serde(rename = "Action", default)]
    action: Option<Value>,
    #[serde(rename = "Resource", default)]
    #[allow(dead_code)]
    resource: Option<Value>,
}

#[derive(Debug)]
pub enum PolicyParseError {
    Decode(String),
    Json(serde_json::Error),
    BadAction,
}

impl std::fmt::Display for PolicyParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyParseError::Decode(reason) => write!(f, "url-decoding policy: {}", reason),
            PolicyParseError::Json(err) => write!(f, "parsing policy JSON: {}", err),
            PolicyParseError::BadAction => {
                write!(f, "Action must be a string or array of strings")
            }
        }
    }
}

impl std::error::Error for PolicyParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PolicyParseError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PolicyParseError {
    fn from(value: serde_json::Error) -> Self {
        PolicyParseError::Json(value)
    }
}

/// Decodes an IAM policy document from its URL-percent-encoded JSON form and
/// returns the deduplicated, normalized list of allowed actions.
///
/// Deny statements are collected first; an Allow action is dropped when the
/// deny set contains `*`, the action itself, or the action's `service:*`
/// wildcard. Denying a specific action does not "split" an allowed wildcard
/// (Allow `s3:*` + Deny `s3:DeleteObject` keeps `s3:*` in the result because
/// the full service catalog cannot be enumerated here). Statement effects
/// other than Allow/Deny are ignored, as are `NotAction` and `Condition`
/// fields.
pub fn parse_policy_document(encoded: &str) -> Result<Vec<String>, PolicyParseError> {
    let decoded = percent_unescape(encoded)?;

    let doc: PolicyDocument = serde_json::from_str(&decoded)?;

    // Bad Action fields fail the whole document, whatever the effect.
    let mut statements = Vec::with_capacity(doc.statement.len());
    for stmt in &doc.statement {
        statements.push((stmt.effect.as_str(), statement_actions(stmt)?));
    }

    // First pass: every action appearing under a Deny effect, normalized.
    let mut denied: HashSet<String> = HashSet::new();
    for (effect, stmt_actions) in &statements {
        if !effect.eq_ignore_ascii_case("Deny") {
            continue;
        }
        for action in stmt_actions {
            denied.insert(normalize_action(action));
        }
    }

    // Second pass: Allow actions not covered by the deny set, deduplicated
    // case-insensitively while preserving first-seen casing.
    let mut seen: HashSet<String> = HashSet::new();
    let mut actions = Vec::new();
    for (effect, stmt_actions) in &statements {
        if !effect.eq_ignore_ascii_case("Allow") {
            continue;
        }
        for action in stmt_actions {
            let norm = normalize_action(action);
            if is_denied(&norm, &denied) {
                continue;
            }
            if seen.insert(norm.to_lowercase()) {
                actions.push(norm);
            }
        }
    }
    Ok(actions)
}

/// Query-unescapes a percent-encoded document. Every `%` must be followed by
/// two hex digits and `+` decodes to a space; a malformed escape fails the
/// whole document rather than passing through literally.
fn percent_unescape(encoded: &str) -> Result<String, PolicyParseError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3).and_then(|pair| {
                    let hi = (pair[0] as char).to_digit(16)?;
                    let lo = (pair[1] as char).to_digit(16)?;
                    Some((hi * 16 + lo) as u8)
                });
                let Some(byte) = hex else {
                    let end = (i + 3).min(bytes.len());
                    return Err(PolicyParseError::Decode(format!(
                        "invalid URL escape {:?}",
                        String::from_utf8_lossy(&bytes[i..end])
                    )));
                };
                out.push(byte);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| {
        PolicyParseError::Decode("decoded document is not valid UTF-8".to_string())
    })
}

/// Reports whether the (already-normalized) action is covered by the deny set.
fn is_denied(action: &str, denied: &HashSet<String>) -> bool {
    if denied.contains("*") {
        return true;
    }
    if denied.contains(action) {
        return true;
    }
    if let Some((service, _)) = action.split_once(':')
        && denied.contains(&format!("{}:*", service))
    {
        return true;
    }
    false
}

/// The Action field is either a single string or a list of strings; anything
/// else is an error. An absent field contributes nothing.
fn statement_actions(stmt: &Statement) -> Result<Vec<String>, PolicyParseError> {
    match &stmt.action {
        None => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let Value::String(s) = item else {
                    return Err(PolicyParseError::BadAction);
                };
                out.push(s.clone());
            }
            Ok(out)
        }
        Some(_) => Err(PolicyParseError::BadAction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

    fn encode(doc: serde_json::Value) -> String {
        let raw = serde_json::to_string(&doc).unwrap();
        utf8_percent_encode(&raw, NON_ALPHANUMERIC).to_string()
    }

    #[test]
    fn parses_single_allow_statement() {
        let encoded = encode(serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [
                {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:GetObject"]);
    }

    #[test]
    fn action_list_and_service_normalization() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["S3:GetObject", "EC2:DescribeInstances"]}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:GetObject", "ec2:DescribeInstances"]);
    }

    #[test]
    fn deny_of_non_allowed_action_is_noop() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["s3:GetObject", "s3:PutObject"]},
                {"Effect": "Deny", "Action": "s3:DeleteObject"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:GetObject", "s3:PutObject"]);
    }

    #[test]
    fn deny_removes_exact_allow() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["s3:*", "ec2:DescribeInstances"]},
                {"Effect": "Deny", "Action": "ec2:DescribeInstances"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:*"]);
    }

    #[test]
    fn specific_deny_does_not_split_allowed_wildcard() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": "s3:*"},
                {"Effect": "Deny", "Action": "s3:DeleteObject"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:*"]);
    }

    #[test]
    fn service_wildcard_deny_covers_all_service_actions() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["s3:GetObject", "ec2:DescribeInstances"]},
                {"Effect": "Deny", "Action": "s3:*"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["ec2:DescribeInstances"]);
    }

    #[test]
    fn global_deny_removes_everything() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["s3:GetObject", "ec2:DescribeInstances"]},
                {"Effect": "Deny", "Action": "*"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn deduplicates_case_insensitively_keeping_first_casing() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["s3:GetObject", "S3:getobject", "s3:GetObject"]}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:GetObject"]);
    }

    #[test]
    fn unknown_effect_is_ignored() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Audit", "Action": "s3:GetObject"},
                {"Effect": "Allow", "Action": "s3:PutObject"}
            ]
        }));
        let actions = parse_policy_document(&encoded).unwrap();
        assert_eq!(actions, vec!["s3:PutObject"]);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = parse_policy_document("%7Bnot-json").unwrap_err();
        assert!(matches!(err, PolicyParseError::Json(_)));
    }

    #[test]
    fn malformed_percent_escape_is_an_error() {
        // Bad hex digits and a truncated trailing escape both fail the
        // document instead of passing through literally.
        for bad in ["%zz%7B%7D", "%7Bfoo%7", "%7Bfoo%"] {
            let err = parse_policy_document(bad).unwrap_err();
            assert!(matches!(err, PolicyParseError::Decode(_)), "{:?}", bad);
        }
    }

    #[test]
    fn plus_decodes_to_space() {
        // {"Statement": []} with the space query-encoded as '+'.
        let actions = parse_policy_document("%7B%22Statement%22%3A+%5B%5D%7D").unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn non_string_action_is_an_error() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": 42}
            ]
        }));
        let err = parse_policy_document(&encoded).unwrap_err();
        assert!(matches!(err, PolicyParseError::BadAction));
    }

    #[test]
    fn mixed_action_array_is_an_error() {
        let encoded = encode(serde_json::json!({
            "Statement": [
                {"Effect": "Allow", "Action": ["s3:GetObject", 7]}
            ]
        }));
        let err = parse_policy_document(&encoded).unwrap_err();
        assert!(matches!(err, PolicyParseError::BadAction));
    }
}
