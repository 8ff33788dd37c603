//! Prometheus-backed MetricsRecorder and the `/metrics` HTTP exporter.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, PoisonError};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::domain::{FailureKind, TaskType};
use crate::ports::MetricsRecorder;

/// Histogram bounds for `task_latency_seconds`, in seconds.
pub const LATENCY_BUCKETS: [f64; 8] = [0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Metric families owned by one agent process, registered on a private registry.
pub struct PrometheusMetrics {
    registry: Registry,
    tasks_dispatched: CounterVec,
    errors_encountered: CounterVec,
    task_latency: HistogramVec,
    active_tasks: IntGaugeVec,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let tasks_dispatched = CounterVec::new(
            Opts::new("tasks_dispatched_total", "Tasks dispatched for processing"),
            &["task_type"],
        )?;
        registry.register(Box::new(tasks_dispatched.clone()))?;

        let errors_encountered = CounterVec::new(
            Opts::new("errors_encountered_total", "Task execution errors by kind"),
            &["error_type"],
        )?;
        registry.register(Box::new(errors_encountered.clone()))?;

        let task_latency = HistogramVec::new(
            HistogramOpts::new("task_latency_seconds", "Duration of one execution attempt")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["task_type"],
        )?;
        registry.register(Box::new(task_latency.clone()))?;

        let active_tasks = IntGaugeVec::new(
            Opts::new("active_tasks", "Tasks currently being processed"),
            &["agent_type"],
        )?;
        registry.register(Box::new(active_tasks.clone()))?;

        Ok(Self {
            registry,
            tasks_dispatched,
            errors_encountered,
            task_latency,
            active_tasks,
        })
    }

    /// Text exposition of every registered family.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsRecorder for PrometheusMetrics {
    fn record_dispatch(&self, task_type: &TaskType) {
        self.tasks_dispatched
            .with_label_values(&[task_type.as_str()])
            .inc();
    }

    fn record_error(&self, kind: FailureKind) {
        self.errors_encountered
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    fn observe_latency(&self, task_type: &TaskType, seconds: f64) {
        self.task_latency
            .with_label_values(&[task_type.as_str()])
            .observe(seconds);
    }

    fn adjust_active(&self, agent_type: &str, delta: i64) {
        self.active_tasks.with_label_values(&[agent_type]).add(delta);
    }
}

/// Ports this process already serves `/metrics` on.
fn serving() -> &'static std::sync::Mutex<HashMap<u16, SocketAddr>> {
    static SERVING: OnceLock<std::sync::Mutex<HashMap<u16, SocketAddr>>> = OnceLock::new();
    SERVING.get_or_init(Default::default)
}

fn serving_on(port: u16) -> Option<SocketAddr> {
    if port == 0 {
        return None;
    }
    serving()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&port)
        .copied()
}

/// Serves `GET /metrics` for one `PrometheusMetrics`.
pub struct MetricsExporter {
    metrics: Arc<PrometheusMetrics>,
    bound: Mutex<Option<SocketAddr>>,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<PrometheusMetrics>) -> Self {
        Self {
            metrics,
            bound: Mutex::new(None),
        }
    }

    fn router(metrics: Arc<PrometheusMetrics>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(metrics)
    }

    /// Bind `0.0.0.0:port` and serve in the background.
    ///
    /// Idempotent per process: calling again, on this or any other exporter, with a port
    /// already served returns that address. The first exporter's metrics stay on it.
    /// Port 0 picks an ephemeral port.
    pub async fn start(&self, port: u16) -> io::Result<SocketAddr> {
        let mut bound = self.bound.lock().await;
        if let Some(addr) = *bound {
            return Ok(addr);
        }
        if let Some(addr) = serving_on(port) {
            *bound = Some(addr);
            return Ok(addr);
        }

        let listener = match TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await {
            Ok(listener) => listener,
            Err(e) => {
                // another exporter may have won the bind in the meantime
                let addr = serving_on(port).ok_or(e)?;
                *bound = Some(addr);
                return Ok(addr);
            }
        };
        let addr = listener.local_addr()?;
        serving()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr.port(), addr);
        let app = Self::router(self.metrics.clone());

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "metrics server stopped");
            }
        });

        tracing::info!(%addr, "metrics exporter listening");
        *bound = Some(addr);
        Ok(addr)
    }
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ActiveTaskGuard;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn render_contains_series_and_buckets() {
        let metrics = PrometheusMetrics::new().unwrap();
        let research = TaskType::new("research");
        metrics.record_dispatch(&research);
        metrics.record_dispatch(&research);
        metrics.record_error(FailureKind::Transient);
        metrics.observe_latency(&research, 0.3);
        {
            let _guard = ActiveTaskGuard::acquire(&metrics, "test_agent");
        }

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"tasks_dispatched_total{task_type="research"} 2"#));
        assert!(text.contains(r#"errors_encountered_total{error_type="transient"} 1"#));
        assert!(text.contains(r#"active_tasks{agent_type="test_agent"} 0"#));
        assert!(text.contains(r#"task_latency_seconds_bucket{task_type="research",le="0.05"} 0"#));
        assert!(text.contains(r#"task_latency_seconds_bucket{task_type="research",le="0.5"} 1"#));
        assert!(text.contains(r#"task_latency_seconds_count{task_type="research"} 1"#));
    }

    #[test]
    fn each_instance_has_its_own_registry() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();
        a.record_dispatch(&TaskType::new("editing"));

        assert!(a.render().unwrap().contains("tasks_dispatched_total"));
        assert!(!b.render().unwrap().contains(r#"task_type="editing""#));
    }

    #[tokio::test]
    async fn exporter_serves_metrics_and_is_idempotent() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        metrics.record_dispatch(&TaskType::new("fact_checking"));
        let exporter = MetricsExporter::new(metrics.clone());

        let first = exporter.start(0).await.unwrap();
        let second = exporter.start(0).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.port(), 0);

        let response = http_get(first, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#"tasks_dispatched_total{task_type="fact_checking"} 1"#));

        let missing = http_get(first, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn second_exporter_on_served_port_reuses_it() {
        let first = MetricsExporter::new(Arc::new(PrometheusMetrics::new().unwrap()));
        let addr = first.start(0).await.unwrap();

        let second = MetricsExporter::new(Arc::new(PrometheusMetrics::new().unwrap()));
        assert_eq!(second.start(addr.port()).await.unwrap(), addr);
        assert_eq!(second.start(addr.port()).await.unwrap(), addr);

        let response = http_get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200"));
    }
}
