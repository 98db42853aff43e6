use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use privsweep_contracts::IdentityGrants;
use privsweep_policy::PolicyParseError;
use tokio::sync::{Semaphore, mpsc};

pub mod aws;
pub mod metrics;

/// Parallel per-identity scrapes are capped to avoid IAM API throttling.
const MAX_CONCURRENT_SCRAPES: usize = 5;

/// Identities under this path are provider-managed and cannot be modified.
const SERVICE_ROLE_PATH_PREFIX: &str = "/aws-service-role/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSummary {
    pub name: String,
    pub arn: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedPolicy {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyVersionSummary {
    pub version_id: String,
    pub is_default: bool,
}

/// Transport-level failure talking to the identity API.
#[derive(Debug)]
pub struct IamApiError {
    message: String,
}

impl IamApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for IamApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IamApiError {}

/// The subset of the IAM API the scraper consumes. All calls are read-only;
/// a mock implementation stands in for the real client in tests.
#[async_trait]
pub trait IamApi: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<RoleSummary>, IamApiError>;
    async fn list_attached_policies(
        &self,
        role_name: &str,
    ) -> Result<Vec<AttachedPolicy>, IamApiError>;
    async fn list_policy_versions(
        &self,
        policy_arn: &str,
    ) -> Result<Vec<PolicyVersionSummary>, IamApiError>;
    async fn get_policy_document(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> Result<String, IamApiError>;
    async fn list_inline_policies(&self, role_name: &str) -> Result<Vec<String>, IamApiError>;
    async fn get_inline_policy_document(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<String, IamApiError>;
}

#[derive(Debug)]
pub enum ScrapeError {
    ListRoles(IamApiError),
    AttachedPolicies { role: String, source: IamApiError },
    PolicyVersions { policy: String, source: IamApiError },
    MissingDefaultVersion { policy: String },
    PolicyDocument { policy: String, source: IamApiError },
    PolicyParse { policy: String, source: PolicyParseError },
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::ListRoles(err) => write!(f, "listing roles: {}", err),
            ScrapeError::AttachedPolicies { role, source } => {
                write!(f, "role {}: listing attached policies: {}", role, source)
            }
            ScrapeError::PolicyVersions { policy, source } => {
                write!(f, "policy {}: listing versions: {}", policy, source)
            }
            ScrapeError::MissingDefaultVersion { policy } => {
                write!(f, "no default version found for policy {}", policy)
            }
            ScrapeError::PolicyDocument { policy, source } => {
                write!(f, "policy {}: fetching document: {}", policy, source)
            }
            ScrapeError::PolicyParse { policy, source } => {
                write!(f, "policy {}: {}", policy, source)
            }
        }
    }
}

impl std::error::Error for ScrapeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScrapeError::ListRoles(err) => Some(err),
            ScrapeError::AttachedPolicies { source, .. } => Some(source),
            ScrapeError::PolicyVersions { source, .. } => Some(source),
            ScrapeError::MissingDefaultVersion { .. } => None,
            ScrapeError::PolicyDocument { source, .. } => Some(source),
            ScrapeError::PolicyParse { source, .. } => Some(source),
        }
    }
}

/// Fetches identities and resolves their effective allowed privileges.
#[derive(Clone)]
pub struct Scraper {
    api: Arc<dyn IamApi>,
}

impl Scraper {
    pub fn new(api: Arc<dyn IamApi>) -> Self {
        Self { api }
    }

    /// Scrapes every customer-managed identity concurrently. Service-linked
    /// identities are skipped. A failure on the initial listing is fatal; a
    /// failed per-identity scrape is logged and dropped from the result.
    pub async fn scrape_all(&self) -> Result<Vec<IdentityGrants>, ScrapeError> {
        let all_roles = self.api.list_roles().await.map_err(ScrapeError::ListRoles)?;

        let total = all_roles.len();
        let roles: Vec<RoleSummary> = all_roles
            .into_iter()
            .filter(|role| {
                if role.path.starts_with(SERVICE_ROLE_PATH_PREFIX) {
                    tracing::debug!(role = %role.name, "skipping service-linked role");
                    false
                } else {
                    true
                }
            })
            .collect();

        tracing::info!(
            total = total,
            customer_managed = roles.len(),
            "scraping IAM roles"
        );

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SCRAPES));
        let (tx, mut rx) = mpsc::channel(roles.len().max(1));

        for role in roles {
            let api = self.api.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = scrape_role(api.as_ref(), &role).await;
                let _ = tx.send(result).await;
            });
        }
        // The channel closes once every task has sent its result.
        drop(tx);

        let mut grants = Vec::new();
        while let Some(result) = rx.recv().await {
            match result {
                Ok(grant) => grants.push(grant),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to scrape role, skipping");
                }
            }
        }
        Ok(grants)
    }
}

/// Resolves one identity's grants from its attached managed policies and its
/// inline policies. Per-policy failures are logged and skipped so the
/// remaining policies still contribute.
async fn scrape_role(api: &dyn IamApi, role: &RoleSummary) -> Result<IdentityGrants, ScrapeError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut privileges = Vec::new();

    let attached = api
        .list_attached_policies(&role.name)
        .await
        .map_err(|source| ScrapeError::AttachedPolicies {
            role: role.name.clone(),
            source,
        })?;

    for policy in attached {
        match attached_policy_actions(api, &policy.arn).await {
            Ok(actions) => {
                for action in actions {
                    if seen.insert(action.to_lowercase()) {
                        privileges.push(action);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    role = %role.name,
                    policy = %policy.arn,
                    error = %err,
                    "failed to get policy actions, skipping policy"
                );
            }
        }
    }

    match api.list_inline_policies(&role.name).await {
        Err(err) => {
            tracing::warn!(role = %role.name, error = %err, "failed to list inline policies, skipping");
        }
        Ok(names) => {
            for policy_name in names {
                let document = match api
                    .get_inline_policy_document(&role.name, &policy_name)
                    .await
                {
                    Ok(document) => document,
                    Err(err) => {
                        tracing::warn!(
                            role = %role.name,
                            policy = %policy_name,
                            error = %err,
                            "failed to get inline policy, skipping"
                        );
                        continue;
                    }
                };
                let actions = match privsweep_policy::parse_policy_document(&document) {
                    Ok(actions) => actions,
                    Err(err) => {
                        tracing::warn!(
                            role = %role.name,
                            policy = %policy_name,
                            error = %err,
                            "failed to parse inline policy document, skipping"
                        );
                        continue;
                    }
                };
                for action in actions {
                    if seen.insert(action.to_lowercase()) {
                        privileges.push(action);
                    }
                }
            }
        }
    }

    Ok(IdentityGrants {
        name: role.name.clone(),
        arn: role.arn.clone(),
        privileges,
    })
}

/// Finds the default version of a managed policy, fetches its document and
/// parses the allowed actions.
async fn attached_policy_actions(
    api: &dyn IamApi,
    policy_arn: &str,
) -> Result<Vec<String>, ScrapeError> {
    let versions =
        api.list_policy_versions(policy_arn)
            .await
            .map_err(|source| ScrapeError::PolicyVersions {
                policy: policy_arn.to_string(),
                source,
            })?;

    let default = versions
        .iter()
        .find(|v| v.is_default)
        .ok_or_else(|| ScrapeError::MissingDefaultVersion {
            policy: policy_arn.to_string(),
        })?;

    let document = api
        .get_policy_document(policy_arn, &default.version_id)
        .await
        .map_err(|source| ScrapeError::PolicyDocument {
            policy: policy_arn.to_string(),
            source,
        })?;

    if document.is_empty() {
        return Ok(Vec::new());
    }

    privsweep_policy::parse_policy_document(&document).map_err(|source| {
        ScrapeError::PolicyParse {
            policy: policy_arn.to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
    use std::collections::HashMap;

    fn encode_doc(actions: &[&str]) -> String {
        let doc = serde_json::json!({
            "Version": "2012-10-17",
            "Statement": [{"Effect": "Allow", "Action": actions, "Resource": "*"}]
        });
        utf8_percent_encode(&doc.to_string(), NON_ALPHANUMERIC).to_string()
    }

    #[derive(Default)]
    struct MockIam {
        roles: Vec<RoleSummary>,
        fail_list_roles: bool,
        attached: HashMap<String, Vec<AttachedPolicy>>,
        fail_attached: HashSet<String>,
        versions: HashMap<String, Vec<PolicyVersionSummary>>,
        documents: HashMap<(String, String), String>,
        inline: HashMap<String, Vec<String>>,
        fail_inline_list: HashSet<String>,
        inline_documents: HashMap<(String, String), String>,
    }

    #[async_trait]
    impl IamApi for MockIam {
        async fn list_roles(&self) -> Result<Vec<RoleSummary>, IamApiError> {
            if self.fail_list_roles {
                return Err(IamApiError::new("listing unavailable"));
            }
            Ok(self.roles.clone())
        }

        async fn list_attached_policies(
            &self,
            role_name: &str,
        ) -> Result<Vec<AttachedPolicy>, IamApiError> {
            if self.fail_attached.contains(role_name) {
                return Err(IamApiError::new("throttled"));
            }
            Ok(self.attached.get(role_name).cloned().unwrap_or_default())
        }

        async fn list_policy_versions(
            &self,
            policy_arn: &str,
        ) -> Result<Vec<PolicyVersionSummary>, IamApiError> {
            Ok(self.versions.get(policy_arn).cloned().unwrap_or_default())
        }

        async fn get_policy_document(
            &self,
            policy_arn: &str,
            version_id: &str,
        ) -> Result<String, IamApiError> {
            self.documents
                .get(&(policy_arn.to_string(), version_id.to_string()))
                .cloned()
                .ok_or_else(|| IamApiError::new("no such version"))
        }

        async fn list_inline_policies(&self, role_name: &str) -> Result<Vec<String>, IamApiError> {
            if self.fail_inline_list.contains(role_name) {
                return Err(IamApiError::new("throttled"));
            }
            Ok(self.inline.get(role_name).cloned().unwrap_or_default())
        }

        async fn get_inline_policy_document(
            &self,
            role_name: &str,
            policy_name: &str,
        ) -> Result<String, IamApiError> {
            self.inline_documents
                .get(&(role_name.to_string(), policy_name.to_string()))
                .cloned()
                .ok_or_else(|| IamApiError::new("no such policy"))
        }
    }

    fn role(name: &str, path: &str) -> RoleSummary {
        RoleSummary {
            name: name.to_string(),
            arn: format!("arn:aws:iam::123456789012:role{}{}", path, name),
            path: path.to_string(),
        }
    }

    fn default_version() -> Vec<PolicyVersionSummary> {
        vec![
            PolicyVersionSummary {
                version_id: "v1".to_string(),
                is_default: false,
            },
            PolicyVersionSummary {
                version_id: "v2".to_string(),
                is_default: true,
            },
        ]
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let mock = MockIam {
            fail_list_roles: true,
            ..Default::default()
        };
        let scraper = Scraper::new(Arc::new(mock));
        let err = scraper.scrape_all().await.unwrap_err();
        assert!(matches!(err, ScrapeError::ListRoles(_)));
    }

    #[tokio::test]
    async fn service_linked_roles_are_skipped() {
        let mock = MockIam {
            roles: vec![role("app", "/"), role("aws-managed", "/aws-service-role/")],
            ..Default::default()
        };
        let scraper = Scraper::new(Arc::new(mock));
        let grants = scraper.scrape_all().await.expect("scrape");
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].name, "app");
    }

    #[tokio::test]
    async fn attached_and_inline_policies_union_with_dedup() {
        let mut mock = MockIam {
            roles: vec![role("app", "/")],
            ..Default::default()
        };
        mock.attached.insert(
            "app".to_string(),
            vec![AttachedPolicy {
                name: "managed".to_string(),
                arn: "arn:aws:iam::aws:policy/managed".to_string(),
            }],
        );
        mock.versions.insert(
            "arn:aws:iam::aws:policy/managed".to_string(),
            default_version(),
        );
        mock.documents.insert(
            (
                "arn:aws:iam::aws:policy/managed".to_string(),
                "v2".to_string(),
            ),
            encode_doc(&["s3:GetObject", "s3:PutObject"]),
        );
        mock.inline
            .insert("app".to_string(), vec!["inline-extra".to_string()]);
        mock.inline_documents.insert(
            ("app".to_string(), "inline-extra".to_string()),
            encode_doc(&["S3:getobject", "ec2:DescribeInstances"]),
        );

        let scraper = Scraper::new(Arc::new(mock));
        let grants = scraper.scrape_all().await.expect("scrape");

        assert_eq!(grants.len(), 1);
        // s3:GetObject from the inline policy differs only in case and is
        // deduplicated; first-seen casing wins.
        assert_eq!(
            grants[0].privileges,
            vec!["s3:GetObject", "s3:PutObject", "ec2:DescribeInstances"]
        );
    }

    #[tokio::test]
    async fn failed_role_is_dropped_while_others_survive() {
        let mut mock = MockIam {
            roles: vec![role("healthy", "/"), role("broken", "/")],
            ..Default::default()
        };
        mock.fail_attached.insert("broken".to_string());

        let scraper = Scraper::new(Arc::new(mock));
        let grants = scraper.scrape_all().await.expect("scrape");
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].name, "healthy");
    }

    #[tokio::test]
    async fn policy_without_default_version_is_skipped() {
        let mut mock = MockIam {
            roles: vec![role("app", "/")],
            ..Default::default()
        };
        mock.attached.insert(
            "app".to_string(),
            vec![
                AttachedPolicy {
                    name: "no-default".to_string(),
                    arn: "arn:aws:iam::aws:policy/no-default".to_string(),
                },
                AttachedPolicy {
                    name: "good".to_string(),
                    arn: "arn:aws:iam::aws:policy/good".to_string(),
                },
            ],
        );
        mock.versions.insert(
            "arn:aws:iam::aws:policy/no-default".to_string(),
            vec![PolicyVersionSummary {
                version_id: "v1".to_string(),
                is_default: false,
            }],
        );
        mock.versions
            .insert("arn:aws:iam::aws:policy/good".to_string(), default_version());
        mock.documents.insert(
            ("arn:aws:iam::aws:policy/good".to_string(), "v2".to_string()),
            encode_doc(&["iam:ListRoles"]),
        );

        let scraper = Scraper::new(Arc::new(mock));
        let grants = scraper.scrape_all().await.expect("scrape");
        assert_eq!(grants[0].privileges, vec!["iam:ListRoles"]);
    }

    #[tokio::test]
    async fn inline_listing_failure_keeps_attached_grants() {
        let mut mock = MockIam {
            roles: vec![role("app", "/")],
            ..Default::default()
        };
        mock.attached.insert(
            "app".to_string(),
            vec![AttachedPolicy {
                name: "managed".to_string(),
                arn: "arn:aws:iam::aws:policy/managed".to_string(),
            }],
        );
        mock.versions.insert(
            "arn:aws:iam::aws:policy/managed".to_string(),
            default_version(),
        );
        mock.documents.insert(
            (
                "arn:aws:iam::aws:policy/managed".to_string(),
                "v2".to_string(),
            ),
            encode_doc(&["s3:GetObject"]),
        );
        mock.fail_inline_list.insert("app".to_string());

        let scraper = Scraper::new(Arc::new(mock));
        let grants = scraper.scrape_all().await.expect("scrape");
        assert_eq!(grants[0].privileges, vec!["s3:GetObject"]);
    }
}
