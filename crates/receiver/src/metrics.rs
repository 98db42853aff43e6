use std::sync::OnceLock;

use prometheus::{IntCounter, Registry};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static SPANS_RECEIVED_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static SPANS_SKIPPED_TOTAL: OnceLock<IntCounter> = OnceLock::new();

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

fn spans_received_total() -> &'static IntCounter {
    SPANS_RECEIVED_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "privsweep_spans_received_total",
                "Total number of OTLP spans received.",
            )
            .expect("create privsweep_spans_received_total"),
        )
    })
}

fn spans_skipped_total() -> &'static IntCounter {
    SPANS_SKIPPED_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "privsweep_spans_skipped_total",
                "Total number of OTLP spans skipped (missing required attributes).",
            )
            .expect("create privsweep_spans_skipped_total"),
        )
    })
}

pub fn inc_spans_received() {
    spans_received_total().inc();
}

pub fn inc_spans_skipped() {
    spans_skipped_total().inc();
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    let _ = spans_received_total();
    let _ = spans_skipped_total();
    registry().gather()
}
