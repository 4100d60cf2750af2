use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

const FORWARD_OUTCOMES: [&str; 3] = ["delivered", "rejected", "failed"];
const KNOWN_METHODS: [&str; 9] =
    ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "CONNECT", "TRACE"];
const DISPATCH_OUTCOMES: [&str; 5] =
    ["success", "bad_request", "not_found", "method_not_allowed", "internal_error"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// In-process counters exposed on the internal listener at `/metrics`.
pub struct GatewayMetrics {
    connections_total: AtomicU64,
    disconnections_total: AtomicU64,
    welcome_failures_total: AtomicU64,
    forward_total: Mutex<HashMap<String, u64>>,
    dispatch_total: Mutex<HashMap<String, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            disconnections_total: AtomicU64::new(0),
            welcome_failures_total: AtomicU64::new(0),
            forward_total: Mutex::new(zeroed_labels(&FORWARD_OUTCOMES)),
            dispatch_total: Mutex::new(zeroed_labels(&DISPATCH_OUTCOMES)),
            request_rate_total: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
        }
    }
}

impl GatewayMetrics {
    pub fn record_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_connection_closed(&self) {
        self.disconnections_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_welcome_failure(&self) {
        self.welcome_failures_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_forward(&self, outcome: &str) {
        increment_label_counter(&self.forward_total, outcome);
    }

    pub fn record_dispatch(&self, outcome: &str) {
        increment_label_counter(&self.dispatch_total, outcome);
    }

    /// `endpoint` must be a route template or another fixed label; raw
    /// request paths would create one series per distinct URL.
    pub fn record_http_request(
        &self,
        method: &str,
        endpoint: &str,
        status_code: u16,
        latency_ms: u64,
    ) {
        let key = EndpointMetricKey {
            endpoint: if endpoint.is_empty() { "/".to_string() } else { endpoint.to_string() },
            method: method_label(method),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    /// Renders Prometheus text exposition. The active session gauge is
    /// sampled by the caller from the registry at render time.
    pub fn render_prometheus(&self, active_sessions: usize) -> String {
        let mut output = String::new();

        output.push_str("# HELP switchboard_sessions_active Sessions currently registered.\n");
        output.push_str("# TYPE switchboard_sessions_active gauge\n");
        output.push_str(&format!("switchboard_sessions_active {active_sessions}\n"));

        append_plain_counter(
            &mut output,
            "switchboard_connections_total",
            "WebSocket connections accepted.",
            &self.connections_total,
        );
        append_plain_counter(
            &mut output,
            "switchboard_disconnections_total",
            "Sessions torn down after read loop exit.",
            &self.disconnections_total,
        );
        append_plain_counter(
            &mut output,
            "switchboard_welcome_failures_total",
            "Connections dropped because the welcome frame could not be sent.",
            &self.welcome_failures_total,
        );

        output.push_str(
            "# HELP switchboard_forward_total Messages forwarded to the processor by outcome.\n",
        );
        output.push_str("# TYPE switchboard_forward_total counter\n");
        append_label_counter_lines(&mut output, "switchboard_forward_total", &self.forward_total);

        output.push_str(
            "# HELP switchboard_dispatch_total Send-message requests handled by outcome.\n",
        );
        output.push_str("# TYPE switchboard_dispatch_total counter\n");
        append_label_counter_lines(&mut output, "switchboard_dispatch_total", &self.dispatch_total);

        output.push_str("# HELP switchboard_request_rate_total Internal HTTP requests by endpoint.\n");
        output.push_str("# TYPE switchboard_request_rate_total counter\n");
        append_endpoint_counter_lines(
            &mut output,
            "switchboard_request_rate_total",
            &self.request_rate_total,
        );

        output.push_str(
            "# HELP switchboard_request_errors_total Internal HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE switchboard_request_errors_total counter\n");
        append_endpoint_counter_lines(
            &mut output,
            "switchboard_request_errors_total",
            &self.request_errors_total,
        );

        output.push_str(
            "# HELP switchboard_request_duration_ms_sum Internal HTTP request latency sum (ms).\n",
        );
        output.push_str("# TYPE switchboard_request_duration_ms_sum counter\n");
        append_endpoint_counter_lines(
            &mut output,
            "switchboard_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output
    }
}

// Extension methods collapse into one label.
fn method_label(method: &str) -> String {
    let method = method.to_ascii_uppercase();
    if KNOWN_METHODS.contains(&method.as_str()) {
        method
    } else {
        "OTHER".to_string()
    }
}

fn zeroed_labels(labels: &[&str]) -> HashMap<String, u64> {
    labels.iter().map(|label| (label.to_string(), 0)).collect()
}

// Counters stay usable after a panic elsewhere held the lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = lock(map);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str) {
    let mut guard = lock(map);
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(1);
}

fn append_plain_counter(output: &mut String, name: &str, help: &str, counter: &AtomicU64) {
    output.push_str(&format!("# HELP {name} {help}\n"));
    output.push_str(&format!("# TYPE {name} counter\n"));
    output.push_str(&format!("{name} {}\n", counter.load(Ordering::SeqCst)));
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = lock(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{outcome=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn append_endpoint_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = lock(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::GatewayMetrics;

    #[test]
    fn render_prometheus_includes_lifecycle_and_outcome_counters() {
        let metrics = GatewayMetrics::default();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();
        metrics.record_welcome_failure();
        metrics.record_forward("delivered");
        metrics.record_forward("failed");
        metrics.record_forward("failed");
        metrics.record_dispatch("not_found");
        metrics.record_http_request("post", "/internal/send-message", 404, 3);
        metrics.record_http_request("POST", "/internal/send-message", 200, 5);

        let rendered = metrics.render_prometheus(1);

        assert!(rendered.contains("switchboard_sessions_active 1"));
        assert!(rendered.contains("switchboard_connections_total 2"));
        assert!(rendered.contains("switchboard_disconnections_total 1"));
        assert!(rendered.contains("switchboard_welcome_failures_total 1"));
        assert!(rendered.contains("switchboard_forward_total{outcome=\"delivered\"} 1"));
        assert!(rendered.contains("switchboard_forward_total{outcome=\"failed\"} 2"));
        assert!(rendered.contains("switchboard_forward_total{outcome=\"rejected\"} 0"));
        assert!(rendered.contains("switchboard_dispatch_total{outcome=\"not_found\"} 1"));
        assert!(rendered.contains("switchboard_dispatch_total{outcome=\"success\"} 0"));
        assert!(rendered.contains(
            "switchboard_request_rate_total{method=\"POST\",endpoint=\"/internal/send-message\"} 2"
        ));
        assert!(rendered.contains(
            "switchboard_request_errors_total{method=\"POST\",endpoint=\"/internal/send-message\"} 1"
        ));
        assert!(rendered.contains(
            "switchboard_request_duration_ms_sum{method=\"POST\",endpoint=\"/internal/send-message\"} 8"
        ));
    }

    #[test]
    fn extension_methods_share_one_label() {
        let metrics = GatewayMetrics::default();
        for method in ["PURGE", "MKCOL", "X-CUSTOM"] {
            metrics.record_http_request(method, "unmatched", 404, 1);
        }
        let rendered = metrics.render_prometheus(0);
        assert!(rendered
            .contains("switchboard_request_rate_total{method=\"OTHER\",endpoint=\"unmatched\"} 3"));
        assert!(!rendered.contains("PURGE"));
    }

    #[test]
    fn label_values_are_escaped() {
        let metrics = GatewayMetrics::default();
        metrics.record_http_request("GET", "/odd\"path", 200, 1);
        let rendered = metrics.render_prometheus(0);
        assert!(rendered.contains("endpoint=\"/odd\\\"path\""));
    }
}
