use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static ANALYSIS_RUNS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static ANALYSIS_DURATION_SECONDS: OnceLock<Histogram> = OnceLock::new();
static UNUSED_PRIVILEGES: OnceLock<GaugeVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn analysis_runs_total() -> &'static IntCounter {
    ANALYSIS_RUNS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "privsweep_analysis_runs_total",
                "Total number of correlation analysis runs.",
            )
            .expect("create privsweep_analysis_runs_total"),
        )
    })
}

fn analysis_duration_seconds() -> &'static Histogram {
    ANALYSIS_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            Histogram::with_opts(HistogramOpts::new(
                "privsweep_analysis_duration_seconds",
                "Duration of correlation analysis runs in seconds.",
            ))
            .expect("create privsweep_analysis_duration_seconds"),
        )
    })
}

fn unused_privileges() -> &'static GaugeVec {
    UNUSED_PRIVILEGES.get_or_init(|| {
        register_collector(
            GaugeVec::new(
                Opts::new(
                    "privsweep_unused_privileges",
                    "Number of unused privileges per identity.",
                ),
                &["identity", "risk_level"],
            )
            .expect("create privsweep_unused_privileges"),
        )
    })
}

pub fn inc_analysis_runs() {
    analysis_runs_total().inc();
}

pub fn observe_analysis_duration(duration: Duration) {
    analysis_duration_seconds().observe(duration.as_secs_f64());
}

pub fn set_unused_privileges(identity: &str, risk_level: &str, count: usize) {
    unused_privileges()
        .with_label_values(&[identity, risk_level])
        .set(count as f64);
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    let _ = analysis_runs_total();
    let _ = analysis_duration_seconds();
    let _ = unused_privileges();
    registry().gather()
}
