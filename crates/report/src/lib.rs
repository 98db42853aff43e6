use std::io::Write;

use chrono::{DateTime, Utc};
use privsweep_contracts::AnalysisResult;
use serde::Serialize;

pub mod terraform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Terraform,
    Json,
    Yaml,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFormatError {
    value: String,
}

impl std::fmt::Display for UnknownFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown output format {:?} (supported: terraform, json, yaml)",
            self.value
        )
    }
}

impl std::error::Error for UnknownFormatError {}

impl std::str::FromStr for OutputFormat {
    type Err = UnknownFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terraform" => Ok(OutputFormat::Terraform),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(UnknownFormatError {
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug)]
pub enum RenderError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Io(err) => write!(f, "writing report: {}", err),
            RenderError::Json(err) => write!(f, "encoding JSON report: {}", err),
            RenderError::Yaml(err) => write!(f, "encoding YAML report: {}", err),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::Io(err) => Some(err),
            RenderError::Json(err) => Some(err),
            RenderError::Yaml(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(value: std::io::Error) -> Self {
        RenderError::Io(value)
    }
}

/// Top-level report shape shared by the JSON and YAML renderers.
#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub identities: Vec<ReportEntry>,
}

#[derive(Debug, Serialize)]
pub struct ReportEntry {
    pub identity: String,
    pub risk_level: String,
    pub assigned_count: usize,
    pub used_count: usize,
    pub unused_count: usize,
    pub assigned_privileges: Vec<String>,
    pub used_privileges: Vec<String>,
    pub unused_privileges: Vec<String>,
}

pub fn build_report(results: &[AnalysisResult]) -> Report {
    Report {
        generated_at: Utc::now(),
        identities: results
            .iter()
            .map(|r| ReportEntry {
                identity: r.identity.clone(),
                risk_level: r.risk_level.as_str().to_string(),
                assigned_count: r.assigned.len(),
                used_count: r.used.len(),
                unused_count: r.unused.len(),
                assigned_privileges: r.assigned.clone(),
                used_privileges: r.used.clone(),
                unused_privileges: r.unused.clone(),
            })
            .collect(),
    }
}

/// Renders the latest analysis results in the requested format.
pub fn render(
    format: OutputFormat,
    results: &[AnalysisResult],
    w: &mut dyn Write,
) -> Result<(), RenderError> {
    match format {
        OutputFormat::Terraform => terraform::render(results, w).map_err(RenderError::Io),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *w, &build_report(results))
                .map_err(RenderError::Json)?;
            writeln!(w)?;
            Ok(())
        }
        OutputFormat::Yaml => {
            serde_yaml::to_writer(w, &build_report(results)).map_err(RenderError::Yaml)
        }
    }
}
