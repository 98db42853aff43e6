use std::sync::OnceLock;

use prometheus::{IntGauge, Registry};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static IDENTITIES_SCRAPED: OnceLock<IntGauge> = OnceLock::new();

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

fn identities_scraped() -> &'static IntGauge {
    IDENTITIES_SCRAPED.get_or_init(|| {
        register_collector(
            IntGauge::new(
                "privsweep_identities_scraped",
                "Number of identities scraped in the last scrape.",
            )
            .expect("create privsweep_identities_scraped"),
        )
    })
}

pub fn set_identities_scraped(count: usize) {
    identities_scraped().set(count as i64);
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    let _ = identities_scraped();
    registry().gather()
}
