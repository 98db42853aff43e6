use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use privsweep_contracts::AnalysisResult;
use privsweep_correlation::Engine;
use privsweep_report::OutputFormat;
use privsweep_scraper::aws::AwsIam;
use privsweep_scraper::{Scraper, metrics as scraper_metrics};
use privsweep_store::Store;

use crate::AppError;
use crate::config::Config;

/// Writes a default configuration file, refusing to overwrite an existing one.
pub fn run_init(path: &str) -> Result<(), AppError> {
    if std::path::Path::new(path).exists() {
        eprintln!("Config already exists at {}", path);
        return Ok(());
    }

    if let Some(dir) = std::path::Path::new(path).parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)?;
    }

    let rendered = serde_yaml::to_string(&Config::default()).map_err(AppError::Yaml)?;
    std::fs::write(path, rendered)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    println!("Created config at {}", path);
    println!("Edit the file to configure your AWS region, OTel endpoint, and storage path.");
    Ok(())
}

/// One full analysis pass: scrape IAM, correlate against stored telemetry,
/// then purge usage records that have aged out of the observation window
/// (plus a one-week buffer for clock skew between runs).
pub async fn run_analyze(config: &Config, store: &Store) -> Result<Vec<AnalysisResult>, AppError> {
    let api = AwsIam::from_region(&config.aws.region).await;
    let scraper = Scraper::new(Arc::new(api));

    tracing::info!("scraping IAM roles...");
    let grants = scraper.scrape_all().await.map_err(AppError::Scrape)?;
    scraper_metrics::set_identities_scraped(grants.len());
    tracing::info!(identities = grants.len(), "IAM scrape complete");

    // Advisory only: a short observation window inflates the unused set.
    match store.oldest_observation().await {
        Err(err) => tracing::warn!(error = %err, "could not check observation age"),
        Ok(None) => {}
        Ok(Some(oldest)) => {
            let collected_days = (Utc::now() - oldest).num_days();
            if collected_days < i64::from(config.observation.min_observation_days) {
                tracing::warn!(
                    collected_days,
                    min_recommended_days = config.observation.min_observation_days,
                    "observation window may be too short"
                );
            }
        }
    }

    let engine = Engine::new(store.clone(), i64::from(config.observation.window_days));
    let results = engine.run(&grants).await.map_err(AppError::Engine)?;

    let cutoff = Utc::now() - Duration::days(i64::from(config.observation.window_days) + 7);
    match store.purge_old_records(cutoff).await {
        Err(err) => tracing::warn!(error = %err, "failed to purge old records"),
        Ok(purged) if purged > 0 => {
            tracing::info!(count = purged, "purged old usage records");
        }
        Ok(_) => {}
    }

    Ok(results)
}

/// `analyze` subcommand: one-shot analysis plus a human summary.
pub async fn run_analyze_command(config: &Config, store: &Store) -> Result<(), AppError> {
    let results = run_analyze(config, store).await?;

    println!();
    println!("=== privsweep analysis results ===");
    println!("Identities analyzed: {}", results.len());
    for result in &results {
        if !result.unused.is_empty() {
            println!(
                "  [{}] {} — {} unused privilege(s)",
                result.risk_level.as_str(),
                result.identity,
                result.unused.len()
            );
        }
    }
    println!();
    println!("Run 'privsweep generate terraform' to produce Terraform output.");
    Ok(())
}

/// `report` subcommand: table of the latest persisted snapshots.
pub async fn run_report(store: &Store) -> Result<(), AppError> {
    let results = store.latest_analysis_results().await?;
    if results.is_empty() {
        println!("No analysis results found. Run 'privsweep analyze' first.");
        return Ok(());
    }

    println!(
        "{:<60}  {:<8}  {:>8}  {:>8}  {:>8}",
        "Identity", "Risk", "Assigned", "Used", "Unused"
    );
    println!("{}", "-".repeat(100));
    for result in &results {
        println!(
            "{:<60}  {:<8}  {:>8}  {:>8}  {:>8}",
            result.identity,
            result.risk_level.as_str(),
            result.assigned.len(),
            result.used.len(),
            result.unused.len()
        );
    }
    Ok(())
}

/// `generate` subcommand: render the latest snapshots in the given format.
pub async fn run_generate(
    store: &Store,
    format: &str,
    output: Option<&str>,
) -> Result<(), AppError> {
    let format = OutputFormat::from_str(format).map_err(AppError::Format)?;

    let results = store.latest_analysis_results().await?;
    if results.is_empty() {
        println!("No analysis results found. Run 'privsweep analyze' first.");
        return Ok(());
    }

    match output {
        None | Some("-") => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            privsweep_report::render(format, &results, &mut handle).map_err(AppError::Render)?;
        }
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            privsweep_report::render(format, &results, &mut file).map_err(AppError::Render)?;
            println!("Output written to {}", path);
        }
    }
    Ok(())
}
