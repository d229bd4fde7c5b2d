use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct GatewayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    frame_duration_count: Mutex<HashMap<String, u64>>,
    frame_duration_sum_ms: Mutex<HashMap<String, u64>>,
    frame_errors_total: Mutex<HashMap<String, u64>>,
    frame_rate_total: Mutex<HashMap<String, u64>>,
    frames_dropped_total: Mutex<HashMap<String, u64>>,
    connections_rejected_total: Mutex<HashMap<String, u64>>,
    presence_transitions_total: Mutex<HashMap<String, u64>>,
    connections_current: AtomicU64,
    connections_opened_total: AtomicU64,
    auth_failures_total: AtomicU64,
    events_delivered_total: AtomicU64,
    delivery_failures_total: AtomicU64,
    hook_tasks_dropped_total: AtomicU64,
}

const DROP_REASONS: [&str; 5] =
    ["parse", "unauthorized_channel", "empty_content", "cross_channel", "not_found"];
const REJECT_REASONS: [&str; 2] = ["per_user_cap", "total_cap"];
const PRESENCE_STATUSES: [&str; 3] = ["online", "away", "offline"];
static GLOBAL_METRICS: OnceLock<Arc<GatewayMetrics>> = OnceLock::new();

impl Default for GatewayMetrics {
    fn default() -> Self {
        let mut frames_dropped_total = HashMap::new();
        for reason in DROP_REASONS {
            frames_dropped_total.insert(reason.to_string(), 0);
        }
        let mut connections_rejected_total = HashMap::new();
        for reason in REJECT_REASONS {
            connections_rejected_total.insert(reason.to_string(), 0);
        }
        let mut presence_transitions_total = HashMap::new();
        for status in PRESENCE_STATUSES {
            presence_transitions_total.insert(status.to_string(), 0);
        }

        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            frame_duration_count: Mutex::new(HashMap::new()),
            frame_duration_sum_ms: Mutex::new(HashMap::new()),
            frame_errors_total: Mutex::new(HashMap::new()),
            frame_rate_total: Mutex::new(HashMap::new()),
            frames_dropped_total: Mutex::new(frames_dropped_total),
            connections_rejected_total: Mutex::new(connections_rejected_total),
            presence_transitions_total: Mutex::new(presence_transitions_total),
            connections_current: AtomicU64::new(0),
            connections_opened_total: AtomicU64::new(0),
            auth_failures_total: AtomicU64::new(0),
            events_delivered_total: AtomicU64::new(0),
            delivery_failures_total: AtomicU64::new(0),
            hook_tasks_dropped_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<GatewayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<GatewayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn record_frame(kind: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_frame(kind, is_error, latency_ms);
    }
}

pub fn increment_frames_dropped(reason: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.increment_frames_dropped(reason);
    }
}

pub fn set_connections_current(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.set_connections_current(count);
    }
}

pub fn increment_connections_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_connections_opened();
    }
}

pub fn increment_connections_rejected(reason: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.increment_connections_rejected(reason);
    }
}

pub fn increment_auth_failures() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_auth_failures();
    }
}

pub fn increment_presence_transitions(status: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.increment_presence_transitions(status);
    }
}

pub fn add_events_delivered(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.add_events_delivered(count);
    }
}

pub fn increment_delivery_failures() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_delivery_failures();
    }
}

pub fn increment_hook_tasks_dropped() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_hook_tasks_dropped();
    }
}

/// Prometheus exposition text for the global registry, empty before install.
pub fn render_global() -> String {
    global_metrics().map(|metrics| metrics.render_prometheus()).unwrap_or_default()
}

impl GatewayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_frame(&self, kind: &str, is_error: bool, latency_ms: u64) {
        let normalized_kind = normalize_frame_kind(kind);
        increment_label_counter(&self.frame_rate_total, &normalized_kind, 1);
        increment_label_counter(&self.frame_duration_sum_ms, &normalized_kind, latency_ms);
        increment_label_counter(&self.frame_duration_count, &normalized_kind, 1);
        if is_error {
            increment_label_counter(&self.frame_errors_total, &normalized_kind, 1);
        }
    }

    pub fn increment_frames_dropped(&self, reason: &str) {
        let mut guard = self.frames_dropped_total.lock().expect("metrics map lock poisoned");
        let normalized = normalize_reason(reason, &DROP_REASONS);
        let value = guard.entry(normalized).or_insert(0);
        *value = value.saturating_add(1);
    }

    pub fn increment_connections_rejected(&self, reason: &str) {
        let mut guard = self.connections_rejected_total.lock().expect("metrics map lock poisoned");
        let normalized = normalize_reason(reason, &REJECT_REASONS);
        let value = guard.entry(normalized).or_insert(0);
        *value = value.saturating_add(1);
    }

    pub fn increment_presence_transitions(&self, status: &str) {
        let mut guard = self.presence_transitions_total.lock().expect("metrics map lock poisoned");
        let normalized = normalize_reason(status, &PRESENCE_STATUSES);
        let value = guard.entry(normalized).or_insert(0);
        *value = value.saturating_add(1);
    }

    pub fn set_connections_current(&self, count: u64) {
        self.connections_current.store(count, Ordering::SeqCst);
    }

    pub fn increment_connections_opened(&self) {
        self.connections_opened_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_auth_failures(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_events_delivered(&self, count: u64) {
        self.events_delivered_total.fetch_add(count, Ordering::SeqCst);
    }

    pub fn increment_delivery_failures(&self) {
        self.delivery_failures_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_hook_tasks_dropped(&self) {
        self.hook_tasks_dropped_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP gateway_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE gateway_request_rate_total counter\n");
        append_counter_lines(&mut output, "gateway_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP gateway_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE gateway_request_errors_total counter\n");
        append_counter_lines(
            &mut output,
            "gateway_request_errors_total",
            &self.request_errors_total,
        );

        output.push_str("# HELP gateway_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE gateway_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "gateway_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP gateway_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE gateway_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "gateway_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP gateway_frame_rate_total Total inbound socket frames by kind.\n");
        output.push_str("# TYPE gateway_frame_rate_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_frame_rate_total",
            "frame",
            &self.frame_rate_total,
        );

        output.push_str(
            "# HELP gateway_frame_errors_total Total inbound frames that failed handling by kind.\n",
        );
        output.push_str("# TYPE gateway_frame_errors_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_frame_errors_total",
            "frame",
            &self.frame_errors_total,
        );

        output.push_str("# HELP gateway_frame_duration_ms_sum Sum of frame handling latency in milliseconds by kind.\n");
        output.push_str("# TYPE gateway_frame_duration_ms_sum counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_frame_duration_ms_sum",
            "frame",
            &self.frame_duration_sum_ms,
        );

        output.push_str(
            "# HELP gateway_frame_duration_ms_count Count of frame handling latency samples by kind.\n",
        );
        output.push_str("# TYPE gateway_frame_duration_ms_count counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_frame_duration_ms_count",
            "frame",
            &self.frame_duration_count,
        );

        output.push_str(
            "# HELP gateway_frames_dropped_total Total inbound frames dropped by reason.\n",
        );
        output.push_str("# TYPE gateway_frames_dropped_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_frames_dropped_total",
            "reason",
            &self.frames_dropped_total,
        );

        output.push_str(
            "# HELP gateway_connections_rejected_total Total admissions rejected by reason.\n",
        );
        output.push_str("# TYPE gateway_connections_rejected_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_connections_rejected_total",
            "reason",
            &self.connections_rejected_total,
        );

        output.push_str(
            "# HELP gateway_presence_transitions_total Total presence transitions by new status.\n",
        );
        output.push_str("# TYPE gateway_presence_transitions_total counter\n");
        append_label_counter_lines(
            &mut output,
            "gateway_presence_transitions_total",
            "status",
            &self.presence_transitions_total,
        );

        output.push_str("# HELP gateway_connections_current Currently registered connections.\n");
        output.push_str("# TYPE gateway_connections_current gauge\n");
        output.push_str(&format!(
            "gateway_connections_current {}\n",
            self.connections_current.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP gateway_connections_opened_total Total connections admitted.\n");
        output.push_str("# TYPE gateway_connections_opened_total counter\n");
        output.push_str(&format!(
            "gateway_connections_opened_total {}\n",
            self.connections_opened_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP gateway_auth_failures_total Total socket upgrades rejected for bad tokens.\n",
        );
        output.push_str("# TYPE gateway_auth_failures_total counter\n");
        output.push_str(&format!(
            "gateway_auth_failures_total {}\n",
            self.auth_failures_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP gateway_events_delivered_total Total events delivered to sockets.\n",
        );
        output.push_str("# TYPE gateway_events_delivered_total counter\n");
        output.push_str(&format!(
            "gateway_events_delivered_total {}\n",
            self.events_delivered_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP gateway_delivery_failures_total Total deliveries that found a closed socket.\n",
        );
        output.push_str("# TYPE gateway_delivery_failures_total counter\n");
        output.push_str(&format!(
            "gateway_delivery_failures_total {}\n",
            self.delivery_failures_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP gateway_hook_tasks_dropped_total Total disconnect side-effect tasks dropped because the queue was full.\n");
        output.push_str("# TYPE gateway_hook_tasks_dropped_total counter\n");
        output.push_str(&format!(
            "gateway_hook_tasks_dropped_total {}\n",
            self.hook_tasks_dropped_total.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
            continue;
        }

        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_frame_kind(kind: &str) -> String {
    let normalized = kind.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn normalize_reason(reason: &str, known: &[&str]) -> String {
    let normalized = reason.trim().to_ascii_lowercase();
    if known.contains(&normalized.as_str()) {
        normalized
    } else {
        "unknown".to_string()
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
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

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    if guard.is_empty() {
        return;
    }

    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
