pub mod config;
pub mod daemon;
pub mod run;

use privsweep_correlation::EngineError;
use privsweep_report::{RenderError, UnknownFormatError};
use privsweep_scraper::ScrapeError;
use privsweep_store::StoreError;

#[derive(Debug)]
pub enum AppError {
    Config(config::ConfigError),
    Store(StoreError),
    Scrape(ScrapeError),
    Engine(EngineError),
    Render(RenderError),
    Format(UnknownFormatError),
    Interval(daemon::ParseIntervalError),
    Bind { addr: String, source: std::io::Error },
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Store(err) => write!(f, "opening database: {}", err),
            AppError::Scrape(err) => write!(f, "scraping IAM: {}", err),
            AppError::Engine(err) => write!(f, "running correlation: {}", err),
            AppError::Render(err) => write!(f, "{}", err),
            AppError::Format(err) => write!(f, "{}", err),
            AppError::Interval(err) => write!(f, "{}", err),
            AppError::Bind { addr, source } => write!(f, "binding {}: {}", addr, source),
            AppError::Io(err) => write!(f, "{}", err),
            AppError::Yaml(err) => write!(f, "encoding config: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Scrape(err) => Some(err),
            AppError::Engine(err) => Some(err),
            AppError::Render(err) => Some(err),
            AppError::Format(err) => Some(err),
            AppError::Interval(err) => Some(err),
            AppError::Bind { source, .. } => Some(source),
            AppError::Io(err) => Some(err),
            AppError::Yaml(err) => Some(err),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(value: config::ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::Store(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}
