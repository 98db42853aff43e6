use async_trait::async_trait;
use aws_sdk_iam::error::DisplayErrorContext;

use crate::{AttachedPolicy, IamApi, IamApiError, PolicyVersionSummary, RoleSummary};

/// `IamApi` implementation over the real AWS SDK client.
pub struct AwsIam {
    client: aws_sdk_iam::Client,
}

impl AwsIam {
    /// Builds a client from the default credential chain pinned to `region`.
    pub async fn from_region(region: &str) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_iam::Client::new(&config),
        }
    }

    pub fn from_client(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }
}

fn api_error(err: impl std::error::Error) -> IamApiError {
    IamApiError::new(format!("{}", DisplayErrorContext(err)))
}

#[async_trait]
impl IamApi for AwsIam {
    async fn list_roles(&self) -> Result<Vec<RoleSummary>, IamApiError> {
        let mut roles = Vec::new();
        let mut pages = self.client.list_roles().into_paginator().send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            for role in page.roles() {
                roles.push(RoleSummary {
                    name: role.role_name().to_string(),
                    arn: role.arn().to_string(),
                    path: role.path().to_string(),
                });
            }
        }
        Ok(roles)
    }

    async fn list_attached_policies(
        &self,
        role_name: &str,
    ) -> Result<Vec<AttachedPolicy>, IamApiError> {
        let mut policies = Vec::new();
        let mut pages = self
            .client
            .list_attached_role_policies()
            .role_name(role_name)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            for policy in page.attached_policies() {
                // A policy without an ARN cannot be resolved further.
                let Some(arn) = policy.policy_arn() else {
                    continue;
                };
                policies.push(AttachedPolicy {
                    name: policy.policy_name().unwrap_or_default().to_string(),
                    arn: arn.to_string(),
                });
            }
        }
        Ok(policies)
    }

    async fn list_policy_versions(
        &self,
        policy_arn: &str,
    ) -> Result<Vec<PolicyVersionSummary>, IamApiError> {
        let output = self
            .client
            .list_policy_versions()
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(api_error)?;

        Ok(output
            .versions()
            .iter()
            .filter_map(|v| {
                v.version_id().map(|version_id| PolicyVersionSummary {
                    version_id: version_id.to_string(),
                    is_default: v.is_default_version(),
                })
            })
            .collect())
    }

    async fn get_policy_document(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<String, IamApiError> {
        let output = self
            .client
            .get_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await
            .map_err(api_error)?;

        Ok(output
            .policy_version()
            .and_then(|v| v.document())
            .unwrap_or_default()
            .to_string())
    }

    async fn list_inline_policies(&self, role_name: &str) -> Result<Vec<String>, IamApiError> {
        let mut names = Vec::new();
        let mut pages = self
            .client
            .list_role_policies()
            .role_name(role_name)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(api_error)?;
            names.extend(page.policy_names().iter().cloned());
        }
        Ok(names)
    }

    async fn get_inline_policy_document(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<String, IamApiError> {
        let output = self
            .client
            .get_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await
            .map_err(api_error)?;

        Ok(output.policy_document().to_string())
    }
}
