use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use privsweep_contracts::{AnalysisResult, IdentityGrants, split_privilege};
use privsweep_store::{Store, StoreError};

pub mod mapping;
pub mod metrics;
pub mod risk;

pub use mapping::map_sdk_action;
pub use risk::{classify_privilege, classify_set};

#[derive(Debug)]
pub enum EngineError {
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Store(err) => write!(f, "querying observed identities: {}", err),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        EngineError::Store(value)
    }
}

/// Correlates observed privilege usage against scraped identity grants.
///
/// The engine never calls the scraper; grants are passed in by value so it
/// can be exercised with synthetic authorization sets.
pub struct Engine {
    store: Store,
    window_days: i64,
}

impl Engine {
    pub fn new(store: Store, window_days: i64) -> Self {
        Self { store, window_days }
    }

    /// Performs a full correlation run for the given grants. Snapshots are
    /// persisted as they are produced and the full result set returned.
    ///
    /// A failure to list observed identities is fatal; everything later is a
    /// per-identity skip.
    pub async fn run(
        &self,
        grants: &[IdentityGrants],
    ) -> Result<Vec<AnalysisResult>, EngineError> {
        let timer = Instant::now();
        let now = Utc::now();
        let since = now - Duration::days(self.window_days);

        metrics::inc_analysis_runs();

        // Telemetry may carry either the ARN or the short name; both keys
        // resolve to the same grants.
        let mut lookup: HashMap<&str, &IdentityGrants> = HashMap::with_capacity(grants.len() * 2);
        for grant in grants {
            lookup.insert(grant.arn.as_str(), grant);
            lookup.insert(grant.name.as_str(), grant);
        }

        let observed = self.store.observed_identities(since).await?;

        let mut results = Vec::with_capacity(grants.len());
        let mut processed: HashSet<&str> = HashSet::new();

        for identity in &observed {
            let Some(grant) = lookup.get(identity.as_str()) else {
                tracing::warn!(
                    identity = %identity,
                    "identity observed in telemetry but not found in scrape, skipping"
                );
                continue;
            };

            match self.correlate_identity(grant, identity, since, now).await {
                Ok(result) => {
                    results.push(result);
                    processed.insert(grant.arn.as_str());
                    processed.insert(grant.name.as_str());
                }
                Err(err) => {
                    tracing::warn!(identity = %identity, error = %err, "failed to correlate identity");
                }
            }
        }

        // Grants with no observations at all: every privilege is unused.
        for grant in grants {
            if processed.contains(grant.arn.as_str()) || processed.contains(grant.name.as_str()) {
                continue;
            }
            let result = AnalysisResult {
                analyzed_at: now,
                identity: grant.arn.clone(),
                assigned: grant.privileges.clone(),
                used: Vec::new(),
                unused: grant.privileges.clone(),
                risk_level: risk::classify_set(&grant.privileges),
            };
            if let Err(err) = self.store.save_analysis_result(&result).await {
                tracing::warn!(identity = %grant.arn, error = %err, "failed to save analysis result");
            }
            results.push(result);
        }

        for result in &results {
            metrics::set_unused_privileges(
                &result.identity,
                result.risk_level.as_str(),
                result.unused.len(),
            );
        }

        let elapsed = timer.elapsed();
        metrics::observe_analysis_duration(elapsed);
        tracing::info!(
            identities_analyzed = results.len(),
            duration_s = elapsed.as_secs_f64(),
            "correlation analysis complete"
        );

        Ok(results)
    }

    async fn correlate_identity(
        &self,
        grant: &IdentityGrants,
        observed_identity: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AnalysisResult, StoreError> {
        let used_raw = self.store.used_privileges(observed_identity, since).await?;

        // Map SDK operation names to IAM action names, then drop observations
        // not covered by any authorization (they may be denied, or predate
        // the scrape).
        let assigned_set: HashSet<&str> = grant.privileges.iter().map(String::as_str).collect();
        let used: Vec<String> = used_raw
            .iter()
            .map(|p| mapping::map_sdk_action(p).to_string())
            .filter(|p| is_covered(p, &grant.privileges, &assigned_set))
            .collect();

        let unused = set_difference(&grant.privileges, &used);
        let risk_level = risk::classify_set(&unused);

        let result = AnalysisResult {
            analyzed_at: now,
            identity: observed_identity.to_string(),
            assigned: grant.privileges.clone(),
            used,
            unused,
            risk_level,
        };

        if let Err(err) = self.store.save_analysis_result(&result).await {
            tracing::warn!(identity = %observed_identity, error = %err, "failed to save analysis result");
        }

        Ok(result)
    }
}

/// Computes `assigned - used` with wildcard-aware matching. An assigned
/// privilege counts as used when it matches a used entry directly, when it is
/// a wildcard satisfied by any same-service (or any) observation, or when a
/// used wildcard covers it.
fn set_difference(assigned: &[String], used: &[String]) -> Vec<String> {
    if assigned.is_empty() {
        return Vec::new();
    }

    let used_set: HashSet<&str> = used.iter().map(String::as_str).collect();
    assigned
        .iter()
        .filter(|a| !is_covered(a, used, &used_set))
        .cloned()
        .collect()
}

/// Whether `privilege` is covered by the `coverers` set:
///   - direct membership;
///   - `privilege == "*"` is covered by any non-empty set;
///   - `privilege == "svc:*"` is covered by any `svc:X` entry;
///   - a `*` or matching `svc:*` among the coverers covers anything.
/// Service comparison is case-insensitive; action comparison is exact.
fn is_covered(privilege: &str, coverers: &[String], coverer_set: &HashSet<&str>) -> bool {
    if coverer_set.contains(privilege) {
        return true;
    }

    if privilege == "*" {
        return !coverers.is_empty();
    }

    let (service, action) = match split_privilege(privilege) {
        Some(parts) => parts,
        None => ("", privilege),
    };

    if action == "*" {
        return coverers.iter().any(|c| {
            split_privilege(c).is_some_and(|(cs, _)| cs.eq_ignore_ascii_case(service))
        });
    }

    for coverer in coverers {
        if coverer == "*" {
            return true;
        }
        if let Some((cs, ca)) = split_privilege(coverer)
            && ca == "*"
            && cs.eq_ignore_ascii_case(service)
        {
            return true;
        }
    }

    false
}
