use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Register descriptions once so every series shows up on `/metrics`.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Feed poll cycles started.");
        describe_counter!("poll_errors_total", "Feed poll cycles that failed after retries.");
        describe_counter!("posts_emitted_total", "Posts handed from pollers to the write stage.");
        describe_counter!("posts_written_total", "Posts upserted into the store.");
        describe_counter!("store_errors_total", "Failed store writes (posts and cursors).");
        describe_counter!("notifications_sent_total", "Operator notifications sent.");
        describe_counter!("classifier_errors_total", "Classification requests that failed.");
        describe_counter!("token_refresh_total", "Successful access token refreshes.");
        describe_counter!(
            "token_refresh_errors_total",
            "Token refreshes that gave up after retries."
        );
        describe_gauge!("feeds_followed", "Feeds currently followed.");
        describe_histogram!("deviantart_request_ms", "DeviantArt API request time in milliseconds.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once, before any task
    /// records a metric.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }
}
