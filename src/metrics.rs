use anyhow::Result;

/// Label values for `tokenbucket_hits_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Granted,
    Forgiven,
    Retried,
    Denied,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Granted => "granted",
            Outcome::Forgiven => "forgiven",
            Outcome::Retried => "retried",
            Outcome::Denied => "denied",
        }
    }
}

/// Install the exporter selected by cargo features; a no-op without one.
pub fn init_exporter() -> Result<()> {
    #[cfg(feature = "prometheus-exporter")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        // Scrape endpoint on the builder's default listener.
        PrometheusBuilder::new().install()?;
    }

    Ok(())
}

pub(crate) fn record_hit(bucket: &str, outcome: Outcome) {
    if !crate::config::metrics_enabled() {
        return;
    }
    metrics::counter!(
        "tokenbucket_hits_total",
        "bucket" => bucket.to_owned(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub(crate) fn record_fill(bucket: &str, tokens: u64) {
    if !crate::config::metrics_enabled() {
        return;
    }
    metrics::counter!("tokenbucket_refills_total", "bucket" => bucket.to_owned()).increment(1);
    metrics::gauge!("tokenbucket_tokens", "bucket" => bucket.to_owned()).set(tokens as f64);
}
