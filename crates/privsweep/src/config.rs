use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub otel: OtelConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub observation: ObservationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtelConfig {
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_otel_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_min_observation_days")]
    pub min_observation_days: u32,
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            min_observation_days: default_min_observation_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_metrics_endpoint(),
        }
    }
}

fn default_otel_endpoint() -> String {
    "0.0.0.0:4318".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_window_days() -> u32 {
    30
}

fn default_min_observation_days() -> u32 {
    7
}

fn default_storage_path() -> String {
    "~/.privsweep/data.db".to_string()
}

fn default_metrics_endpoint() -> String {
    "0.0.0.0:9090".to_string()
}

#[derive(Debug)]
pub enum ConfigError {
    NotFound { path: String },
    Read { path: String, source: std::io::Error },
    Parse(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound { path } => write!(
                f,
                "config file not found at {} — run 'privsweep init' to create one",
                path
            ),
            ConfigError::Read { path, source } => {
                write!(f, "reading config at {}: {}", path, source)
            }
            ConfigError::Parse(err) => write!(f, "parsing config: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse(err) => Some(err),
            ConfigError::NotFound { .. } => None,
        }
    }
}

impl Config {
    /// Reads the YAML config at `path`. Absent options fall back to their
    /// defaults; an absent file is a fatal error.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_string(),
                });
            }
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.to_string(),
                    source: err,
                });
            }
        };

        let mut config: Config = serde_yaml::from_str(&raw).map_err(ConfigError::Parse)?;
        config.storage.path = expand_path(&config.storage.path);
        Ok(config)
    }
}

/// Default location of the config file (`~/.privsweep/config.yaml`).
pub fn default_config_path() -> String {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => format!("{}/.privsweep/config.yaml", home),
        _ => ".privsweep/config.yaml".to_string(),
    }
}

/// Expands a leading `~/` to the user's home directory.
pub fn expand_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
        && !home.is_empty()
    {
        return format!("{}/{}", home, rest);
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_fill_missing_sections() {
        let config: Config = serde_yaml::from_str("aws:\n  region: eu-west-1\n").unwrap();
        assert_eq!(config.aws.region, "eu-west-1");
        assert_eq!(config.otel.endpoint, "0.0.0.0:4318");
        assert_eq!(config.observation.window_days, 30);
        assert_eq!(config.observation.min_observation_days, 7);
        assert_eq!(config.metrics.endpoint, "0.0.0.0:9090");
    }

    #[test]
    fn defaults_fill_missing_fields_within_a_section() {
        let config: Config =
            serde_yaml::from_str("observation:\n  window_days: 60\n").unwrap();
        assert_eq!(config.observation.window_days, 60);
        assert_eq!(config.observation.min_observation_days, 7);
    }

    #[test]
    fn load_expands_storage_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "storage:\n  path: ~/privsweep-test/data.db").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(config.storage.path, format!("{}/privsweep-test/data.db", home));
        }
    }

    #[test]
    fn load_missing_file_points_at_init() {
        let err = Config::load("/nonexistent/privsweep/config.yaml").unwrap_err();
        assert!(err.to_string().contains("privsweep init"));
    }

    #[test]
    fn default_config_serializes_and_reloads() {
        let rendered = serde_yaml::to_string(&Config::default()).unwrap();
        let parsed: Config = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed.storage.path, "~/.privsweep/data.db");
        assert_eq!(parsed.aws.region, "us-east-1");
    }
}
