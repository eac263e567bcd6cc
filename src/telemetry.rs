use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Initializes the tracing subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Counters and latency histogram for outbound pushes, exposed at `/metrics`.
#[derive(Clone)]
pub struct PushMetrics {
    pushes: IntCounterVec,
    duration: HistogramVec,
}

impl PushMetrics {
    pub fn new(registry: &Registry) -> anyhow::Result<Self> {
        let pushes = IntCounterVec::new(
            Opts::new(
                "shove_pushes_total",
                "Outbound push attempts by service and status",
            ),
            &["service", "status"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "shove_push_duration_seconds",
                "Outbound push latency by service",
            ),
            &["service"],
        )?;
        registry.register(Box::new(pushes.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self { pushes, duration })
    }

    pub fn observe_push(&self, service: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "failure" };
        self.pushes.with_label_values(&[service, status]).inc();
        self.duration
            .with_label_values(&[service])
            .observe(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_observe() {
        let registry = Registry::new();
        let metrics = PushMetrics::new(&registry).unwrap();

        metrics.observe_push("webhook", true, Duration::from_millis(12));
        metrics.observe_push("webhook", false, Duration::from_millis(30));

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "shove_pushes_total"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        PushMetrics::new(&registry).unwrap();
        assert!(PushMetrics::new(&registry).is_err());
    }
}
