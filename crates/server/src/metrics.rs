use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Mutex,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// Process-wide counters exposed on `/metrics`.
#[derive(Default)]
pub struct ChatMetrics {
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    connections_opened_total: AtomicU64,
    connections_closed_total: AtomicU64,
    connections_live: AtomicI64,
    frames_received_total: AtomicU64,
    frames_rejected_total: AtomicU64,
    messages_persisted_total: AtomicU64,
    persist_failures_total: AtomicU64,
    retention_failures_total: AtomicU64,
    broadcasts_total: AtomicU64,
    evictions_total: AtomicU64,
}

impl ChatMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn connection_opened(&self) {
        self.connections_opened_total.fetch_add(1, Ordering::SeqCst);
        self.connections_live.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_closed(&self) {
        self.connections_closed_total.fetch_add(1, Ordering::SeqCst);
        self.connections_live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn frame_received(&self) {
        self.frames_received_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn message_persisted(&self) {
        self.messages_persisted_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn persist_failed(&self) {
        self.persist_failures_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn retention_failed(&self) {
        self.retention_failures_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn broadcast(&self, evicted: usize) {
        self.broadcasts_total.fetch_add(1, Ordering::SeqCst);
        self.evictions_total.fetch_add(evicted as u64, Ordering::SeqCst);
    }

    pub fn live_connections(&self) -> i64 {
        self.connections_live.load(Ordering::SeqCst)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP forum_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE forum_request_rate_total counter\n");
        append_counter_lines(&mut output, "forum_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP forum_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE forum_request_errors_total counter\n");
        append_counter_lines(&mut output, "forum_request_errors_total", &self.request_errors_total);

        output.push_str(
            "# HELP forum_request_duration_ms_sum \
             Sum of HTTP request latency in milliseconds by endpoint.\n",
        );
        output.push_str("# TYPE forum_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "forum_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        append_scalar(
            &mut output,
            "forum_chat_connections_opened_total",
            "counter",
            "Chat connections registered with the hub.",
            self.connections_opened_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_connections_closed_total",
            "counter",
            "Chat connections removed from the hub.",
            self.connections_closed_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_connections_live",
            "gauge",
            "Chat connections currently registered.",
            self.live_connections().max(0),
        );
        append_scalar(
            &mut output,
            "forum_chat_frames_received_total",
            "counter",
            "Inbound chat frames decoded.",
            self.frames_received_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_frames_rejected_total",
            "counter",
            "Inbound chat frames that could not be decoded.",
            self.frames_rejected_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_messages_persisted_total",
            "counter",
            "Chat messages written to the message store.",
            self.messages_persisted_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_persist_failures_total",
            "counter",
            "Chat messages the store failed to save.",
            self.persist_failures_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_retention_failures_total",
            "counter",
            "Retention prunes that failed.",
            self.retention_failures_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_broadcasts_total",
            "counter",
            "Chat frames fanned out to registered connections.",
            self.broadcasts_total.load(Ordering::SeqCst),
        );
        append_scalar(
            &mut output,
            "forum_chat_evictions_total",
            "counter",
            "Connections evicted after a failed delivery.",
            self.evictions_total.load(Ordering::SeqCst),
        );

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }

    let normalized: Vec<&str> = segments
        .into_iter()
        .map(|segment| {
            if segment.chars().all(|character| character.is_ascii_digit()) {
                "{number}"
            } else {
                segment
            }
        })
        .collect();
    format!("/{}", normalized.join("/"))
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

fn append_scalar(
    output: &mut String,
    metric_name: &str,
    metric_type: &str,
    help: &str,
    value: impl std::fmt::Display,
) {
    output.push_str(&format!("# HELP {metric_name} {help}\n"));
    output.push_str(&format!("# TYPE {metric_name} {metric_type}\n"));
    output.push_str(&format!("{metric_name} {value}\n"));
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

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
