use privsweep_contracts::{RiskLevel, split_privilege};

const HIGH_PREFIXES: &[&str] = &["Delete", "Terminate"];
const LOW_PREFIXES: &[&str] = &["Describe", "List", "Get"];
const MEDIUM_PREFIXES: &[&str] = &["Create", "Put", "Modify", "Update", "Attach", "Detach"];

/// Risk level for a single privilege of the form `service:Action`, `service:*`
/// or `*`. Wildcards classify MEDIUM, destructive prefixes HIGH, read-only
/// prefixes LOW, mutating prefixes MEDIUM, unknown patterns MEDIUM.
pub fn classify_privilege(privilege: &str) -> RiskLevel {
    let action = match split_privilege(privilege) {
        Some((_, action)) => action,
        None => privilege,
    };

    if action.ends_with('*') {
        return RiskLevel::Medium;
    }

    if HIGH_PREFIXES.iter().any(|p| action.starts_with(p)) {
        return RiskLevel::High;
    }
    if LOW_PREFIXES.iter().any(|p| action.starts_with(p)) {
        return RiskLevel::Low;
    }
    if MEDIUM_PREFIXES.iter().any(|p| action.starts_with(p)) {
        return RiskLevel::Medium;
    }

    RiskLevel::Medium
}

/// Highest risk level across a set of privileges; HIGH short-circuits. An
/// empty set is LOW.
pub fn classify_set(privileges: &[String]) -> RiskLevel {
    let mut highest = RiskLevel::Low;
    for privilege in privileges {
        match classify_privilege(privilege) {
            RiskLevel::High => return RiskLevel::High,
            RiskLevel::Medium => highest = RiskLevel::Medium,
            _ => {}
        }
    }
    highest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_privilege_by_prefix() {
        let cases = [
            ("s3:DeleteObject", RiskLevel::High),
            ("ec2:TerminateInstances", RiskLevel::High),
            ("s3:GetObject", RiskLevel::Low),
            ("iam:ListRoles", RiskLevel::Low),
            ("ec2:DescribeInstances", RiskLevel::Low),
            ("s3:PutObject", RiskLevel::Medium),
            ("iam:CreateRole", RiskLevel::Medium),
            ("ec2:ModifyInstanceAttribute", RiskLevel::Medium),
            ("s3:*", RiskLevel::Medium),
            ("*", RiskLevel::Medium),
            ("s3:UnknownAction", RiskLevel::Medium),
        ];
        for (privilege, expected) in cases {
            assert_eq!(classify_privilege(privilege), expected, "{}", privilege);
        }
    }

    fn privs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classify_set_aggregates() {
        assert_eq!(classify_set(&[]), RiskLevel::Low);
        assert_eq!(
            classify_set(&privs(&["s3:GetObject", "ec2:DescribeInstances"])),
            RiskLevel::Low
        );
        assert_eq!(
            classify_set(&privs(&["s3:GetObject", "s3:PutObject"])),
            RiskLevel::Medium
        );
        assert_eq!(
            classify_set(&privs(&["s3:GetObject", "s3:DeleteObject"])),
            RiskLevel::High
        );
        assert_eq!(
            classify_set(&privs(&["ec2:TerminateInstances"])),
            RiskLevel::High
        );
    }
}
