use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{StatusCode, header};
use axum::routing::get;
use prometheus::Encoder;
use privsweep_store::Store;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::AppError;
use crate::config::Config;
use crate::run;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIntervalError {
    value: String,
    reason: &'static str,
}

impl std::fmt::Display for ParseIntervalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid interval {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for ParseIntervalError {}

/// Parses an analysis interval of the form `45s`, `30m`, `24h` or `7d`.
pub fn parse_interval(s: &str) -> Result<Duration, ParseIntervalError> {
    let err = |reason| ParseIntervalError {
        value: s.to_string(),
        reason,
    };

    let trimmed = s.trim();
    let Some(unit) = trimmed.chars().last() else {
        return Err(err("empty"));
    };
    let value = &trimmed[..trimmed.len() - unit.len_utf8()];
    let value: u64 = value.parse().map_err(|_| err("expected forms like 30m, 24h, 7d"))?;
    if value == 0 {
        return Err(err("must be positive"));
    }

    let seconds = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        'd' => value * 86_400,
        _ => return Err(err("expected forms like 30m, 24h, 7d")),
    };
    Ok(Duration::from_secs(seconds))
}

/// Runs the receiver, the metrics endpoint and the periodic analysis loop
/// until SIGINT/SIGTERM. In-flight analyses are drained before returning.
pub async fn run_daemon(
    config: Config,
    store: Store,
    interval: Duration,
    skip_if_running: bool,
) -> Result<(), AppError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_listener = tokio::net::TcpListener::bind(&config.metrics.endpoint)
        .await
        .map_err(|source| AppError::Bind {
            addr: config.metrics.endpoint.clone(),
            source,
        })?;
    let otel_listener = tokio::net::TcpListener::bind(&config.otel.endpoint)
        .await
        .map_err(|source| AppError::Bind {
            addr: config.otel.endpoint.clone(),
            source,
        })?;

    tracing::info!(addr = %config.metrics.endpoint, "metrics server listening");
    let metrics_server = tokio::spawn(serve_until_shutdown(
        metrics_listener,
        metrics_router(),
        shutdown_rx.clone(),
    ));

    tracing::info!(addr = %config.otel.endpoint, "OTLP receiver listening");
    let receiver_server = tokio::spawn(serve_until_shutdown(
        otel_listener,
        privsweep_receiver::router(store.clone()),
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(interval_s = interval.as_secs(), "daemon started");

    // A single-slot mutex guards the analysis: per-identity gauge updates
    // would race if two runs overlapped on the same store.
    let running = Arc::new(tokio::sync::Mutex::new(()));
    let mut analyses: JoinSet<()> = JoinSet::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut shutdown = shutdown_rx.clone();
    loop {
        tokio::select! {
            // The first tick fires immediately, so an analysis starts on boot.
            _ = ticker.tick() => {
                launch_analysis(&mut analyses, &config, &store, &running, skip_if_running);
            }
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("daemon shutting down, waiting for in-flight work...");
    while analyses.join_next().await.is_some() {}

    let _ = metrics_server.await;
    let _ = receiver_server.await;
    Ok(())
}

fn launch_analysis(
    analyses: &mut JoinSet<()>,
    config: &Config,
    store: &Store,
    running: &Arc<tokio::sync::Mutex<()>>,
    skip_if_running: bool,
) {
    let permit = if skip_if_running {
        match running.clone().try_lock_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::info!("analysis already running, skipping");
                return;
            }
        }
    } else {
        None
    };

    let config = config.clone();
    let store = store.clone();
    analyses.spawn(async move {
        let _permit = permit;
        if let Err(err) = run::run_analyze(&config, &store).await {
            tracing::error!(error = %err, "analysis failed");
        }
    });
}

async fn serve_until_shutdown(
    listener: tokio::net::TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await;
    if let Err(err) = result {
        tracing::error!(error = %err, "server stopped");
    }
}

fn metrics_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> axum::response::Result<impl axum::response::IntoResponse> {
    let mut families = privsweep_receiver::metrics::gather();
    families.extend(privsweep_scraper::metrics::gather());
    families.extend(privsweep_correlation::metrics::gather());

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return Err(StatusCode::INTERNAL_SERVER_ERROR.into());
    }

    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_units() {
        assert_eq!(parse_interval("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_interval("30m").unwrap(), Duration::from_secs(30 * 60));
        assert_eq!(parse_interval("24h").unwrap(), Duration::from_secs(24 * 3600));
        assert_eq!(parse_interval("7d").unwrap(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn rejects_bad_intervals() {
        for bad in ["", "10", "h", "-5m", "0d", "1w"] {
            assert!(parse_interval(bad).is_err(), "{:?} should be rejected", bad);
        }
    }
}
