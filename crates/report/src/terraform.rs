use std::io::Write;

use privsweep_contracts::AnalysisResult;

/// Renders suggested minimized IAM policies as Terraform HCL.
///
/// Identities with unused privileges get an `aws_iam_policy` resource holding
/// only the observed actions. Identities with nothing unused get a comment.
/// Identities with zero observations get a WARNING comment and no policy at
/// all — an empty `Action = []` block would be invalid HCL and removing all
/// access based on missing telemetry is never a safe suggestion.
pub fn render(results: &[AnalysisResult], w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "# Generated by privsweep — suggested minimized IAM policies.")?;
    writeln!(
        w,
        "# Review before applying: observation gaps look identical to unused privileges."
    )?;

    for result in results {
        writeln!(w)?;

        if result.unused.is_empty() {
            writeln!(
                w,
                "# No unused privileges for {} — policy already minimal.",
                result.identity
            )?;
            continue;
        }

        if result.used.is_empty() {
            writeln!(
                w,
                "# WARNING: {} has no observed activity in the window.",
                result.identity
            )?;
            writeln!(
                w,
                "# All {} assigned privilege(s) appear unused; confirm telemetry coverage before removing access.",
                result.assigned.len()
            )?;
            continue;
        }

        let resource = resource_name(&result.identity);
        writeln!(w, "resource \"aws_iam_policy\" \"{}_minimized\" {{", resource)?;
        writeln!(w, "  name        = \"{}-minimized\"", short_name(&result.identity))?;
        writeln!(
            w,
            "  description = \"Minimized policy for {} (risk of unused: {})\"",
            result.identity,
            result.risk_level.as_str()
        )?;
        writeln!(w)?;
        writeln!(w, "  policy = jsonencode({{")?;
        writeln!(w, "    Version = \"2012-10-17\"")?;
        writeln!(w, "    Statement = [")?;
        writeln!(w, "      {{")?;
        writeln!(w, "        Effect   = \"Allow\"")?;
        writeln!(w, "        Action   = [")?;
        for action in &result.used {
            writeln!(w, "          \"{}\",", action)?;
        }
        writeln!(w, "        ]")?;
        writeln!(w, "        Resource = \"*\"")?;
        writeln!(w, "      }}")?;
        writeln!(w, "    ]")?;
        writeln!(w, "  }})")?;
        writeln!(w, "}}")?;
    }

    Ok(())
}

/// The last path segment of an ARN-style identity, for human-facing names.
fn short_name(identity: &str) -> &str {
    identity.rsplit('/').next().unwrap_or(identity)
}

/// Lowercases the full identity and collapses every run of
/// non-alphanumeric characters to a single `_`, producing a valid Terraform
/// resource label.
pub fn resource_name(identity: &str) -> String {
    let mut name = String::with_capacity(identity.len());
    for c in identity.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    if name.is_empty() {
        name.push('_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_resource_names() {
        let cases = [
            ("arn:aws:iam::123:role/MyRole", "arn_aws_iam_123_role_myrole"),
            ("MyRole", "myrole"),
            ("my-role-name", "my_role_name"),
        ];
        for (input, expected) in cases {
            assert_eq!(resource_name(input), expected, "{}", input);
        }
    }
}
