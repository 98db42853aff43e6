/// Converts an SDK-observed privilege to its canonical IAM action name.
///
/// Only operations whose telemetry-emitted name differs from the IAM action
/// name appear here; everything else passes through unchanged, which doubles
/// as the identity mapping. Input format is `service:Operation` with the
/// service already lowercased.
pub fn map_sdk_action(privilege: &str) -> &str {
    match privilege {
        // Lambda SDKs use short invoke names; IAM requires the full one.
        "lambda:Invoke" | "lambda:InvokeAsync" | "lambda:InvokeWithQualifier" => {
            "lambda:InvokeFunction"
        }

        // S3 HEAD operations authorize against the corresponding read action.
        "s3:HeadObject" => "s3:GetObject",
        "s3:HeadBucket" => "s3:ListBucket",

        // EC2 SDKs use the singular form; IAM uses the plural.
        "ec2:StartInstance" => "ec2:StartInstances",
        "ec2:StopInstance" => "ec2:StopInstances",

        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_sdk_operations() {
        assert_eq!(map_sdk_action("lambda:Invoke"), "lambda:InvokeFunction");
        assert_eq!(map_sdk_action("lambda:InvokeAsync"), "lambda:InvokeFunction");
        assert_eq!(map_sdk_action("s3:HeadObject"), "s3:GetObject");
        assert_eq!(map_sdk_action("s3:HeadBucket"), "s3:ListBucket");
        assert_eq!(map_sdk_action("ec2:StartInstance"), "ec2:StartInstances");
        assert_eq!(map_sdk_action("ec2:StopInstance"), "ec2:StopInstances");
    }

    #[test]
    fn passes_through_unmapped_operations() {
        assert_eq!(map_sdk_action("s3:GetObject"), "s3:GetObject");
        assert_eq!(map_sdk_action("unknown:SomeOp"), "unknown:SomeOp");
    }
}
