use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP
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

    // Database (PostgreSQL)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Grading
    pub static ref TASK_SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "task_submissions_total",
        "Total number of task submissions",
        &["grading"]
    )
    .unwrap();

    // Image stylization
    pub static ref STYLIZE_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stylize_jobs_total",
        "Total number of photo stylization jobs",
        &["status"]
    )
    .unwrap();

    pub static ref STYLIZE_QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "stylize_queue_depth",
        "Number of stylization jobs waiting for the worker"
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

/// Runs a database future and records its outcome and latency under `operation`.
pub async fn track_db_operation<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_http_counter() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
    }

    #[tokio::test]
    async fn db_operation_outcome_is_counted() {
        let before = DB_OPERATIONS_TOTAL
            .with_label_values(&["unit_test_op", "error"])
            .get();

        let result: Result<(), &str> = track_db_operation("unit_test_op", async { Err("boom") }).await;
        assert!(result.is_err());

        let after = DB_OPERATIONS_TOTAL
            .with_label_values(&["unit_test_op", "error"])
            .get();
        assert_eq!(after, before + 1);
    }
}
