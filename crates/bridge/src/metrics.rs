use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static LEDGER_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static LEDGER_OPERATION_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static UPLOAD_FILES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static SESSION_CONNECTED: OnceLock<IntGauge> = OnceLock::new();

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

fn ledger_operations_total() -> &'static IntCounterVec {
    LEDGER_OPERATIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "medrec_ledger_operations_total",
                    "Ledger operations by operation and outcome.",
                ),
                &["operation", "outcome"],
            )
            .expect("create medrec_ledger_operations_total"),
        )
    })
}

fn ledger_operation_duration_seconds() -> &'static HistogramVec {
    LEDGER_OPERATION_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "medrec_ledger_operation_duration_seconds",
                    "Ledger operation duration in seconds, including confirmation waits.",
                )
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0, 120.0]),
                &["operation"],
            )
            .expect("create medrec_ledger_operation_duration_seconds"),
        )
    })
}

fn upload_files_total() -> &'static IntCounterVec {
    UPLOAD_FILES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new("medrec_upload_files_total", "Attachment uploads by outcome."),
                &["outcome"],
            )
            .expect("create medrec_upload_files_total"),
        )
    })
}

fn session_connected() -> &'static IntGauge {
    SESSION_CONNECTED.get_or_init(|| {
        register_collector(
            IntGauge::new(
                "medrec_session_connected",
                "1 while a wallet session is connected.",
            )
            .expect("create medrec_session_connected"),
        )
    })
}

pub fn observe_ledger_operation(operation: &str, outcome: &str, duration: Duration) {
    ledger_operations_total()
        .with_label_values(&[operation, outcome])
        .inc();
    ledger_operation_duration_seconds()
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn observe_uploads(uploaded: usize, failed: usize) {
    upload_files_total()
        .with_label_values(&["ok"])
        .inc_by(uploaded as u64);
    upload_files_total()
        .with_label_values(&["failed"])
        .inc_by(failed as u64);
}

pub fn set_session_connected(connected: bool) {
    session_connected().set(i64::from(connected));
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = session_connected();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
