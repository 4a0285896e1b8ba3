use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Scope locks (local or Redis)
    pub static ref LOCK_ACQUISITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lock_acquisitions_total",
        "Scope lock acquisitions",
        &["backend", "result"]
    )
    .unwrap();

    pub static ref LOCK_WAIT_SECONDS: HistogramVec = register_histogram_vec!(
        "lock_wait_seconds",
        "Time spent waiting for a scope lock",
        &["backend"],
        vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5]
    )
    .unwrap();

    // Business Metrics
    pub static ref LESSON_VIEWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lesson_views_total",
        "Lesson views by outcome",
        &["result"]
    )
    .unwrap();

    pub static ref EVALUATION_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "evaluation_attempts_total",
        "Evaluation attempt transitions",
        &["outcome"]
    )
    .unwrap();

    pub static ref EVALUATION_ANSWERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "evaluation_answers_total",
        "Answers recorded for evaluation attempts",
        &["correct"]
    )
    .unwrap();

    pub static ref PROGRESS_RECOMPUTES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progress_recomputes_total",
        "Module progress recomputations",
        &["changed"]
    )
    .unwrap();

    pub static ref CERTIFICATES_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "certificates_issued_total",
        "Certificates issued"
    )
    .unwrap();

    pub static ref BOOKKEEPING_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "bookkeeping_failures_total",
        "Swallowed failures of non-critical writes",
        &["operation"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T, E>(operation: &str, collection: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_lock_wait(backend: &str, acquired: bool, waited: std::time::Duration) {
    let result = if acquired { "acquired" } else { "timeout" };
    LOCK_ACQUISITIONS_TOTAL
        .with_label_values(&[backend, result])
        .inc();
    LOCK_WAIT_SECONDS
        .with_label_values(&[backend])
        .observe(waited.as_secs_f64());
}

pub fn record_bookkeeping_failure(operation: &str) {
    BOOKKEEPING_FAILURES_TOTAL
        .with_label_values(&[operation])
        .inc();
}
