use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

// Global registry and metrics are initialized lazily.
static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("fieldflow".to_string()), None)
        .expect("metric registry prefix is valid")
});

static PIPELINE_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new("pipeline_duration_ms", "Pipeline run duration in milliseconds")
        .buckets(vec![5.0, 25.0, 100.0, 500.0, 1_000.0, 5_000.0, 30_000.0, 120_000.0]);
    let hist = HistogramVec::new(opts, &["pipeline"]).expect("histogram definition is valid");
    REGISTRY.register(Box::new(hist.clone())).ok();
    hist
});

static PIPELINE_RUNS: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("pipeline_runs_total", "Total pipeline runs started");
    let c = CounterVec::new(opts, &["pipeline"]).expect("counter definition is valid");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static PIPELINE_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("pipeline_failures_total", "Failed pipeline runs by failing stage");
    let c = CounterVec::new(opts, &["pipeline", "stage"]).expect("counter definition is valid");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static ROWS_WRITTEN: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("rows_written_total", "Rows handed to destination writers");
    let c = CounterVec::new(opts, &["pipeline"]).expect("counter definition is valid");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Observe a pipeline run duration in milliseconds.
pub fn observe_duration(pipeline: &str, duration_ms: f64) {
    PIPELINE_DURATION_MS.with_label_values(&[pipeline]).observe(duration_ms);
}

pub fn inc_run(pipeline: &str) {
    PIPELINE_RUNS.with_label_values(&[pipeline]).inc();
}

/// Count a failed run against the stage it failed in.
pub fn inc_failure(pipeline: &str, stage: &str) {
    PIPELINE_FAILURES.with_label_values(&[pipeline, stage]).inc();
}

pub fn add_rows_written(pipeline: &str, rows: u64) {
    ROWS_WRITTEN.with_label_values(&[pipeline]).inc_by(rows as f64);
}

/// Gather metrics as text in Prometheus exposition format.
///
/// ```no_run
/// use fieldflow_core::metrics;
/// metrics::inc_run("orders_sync");
/// println!("{}", metrics::gather_text());
/// ```
pub fn gather_text() -> String {
    // touch every family so an idle process still exposes them
    Lazy::force(&PIPELINE_DURATION_MS);
    Lazy::force(&PIPELINE_RUNS);
    Lazy::force(&PIPELINE_FAILURES);
    Lazy::force(&ROWS_WRITTEN);

    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
