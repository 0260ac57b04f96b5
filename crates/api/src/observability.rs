use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rapport_domain::ports::presence::{DeliveryObserver, DeliveryOutcome};

const HTTP_REQUESTS_TOTAL: &str = "rapport_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "rapport_api_http_request_duration_seconds";
const HTTP_REQUEST_ERRORS_TOTAL: &str = "rapport_api_http_errors_total";
const REALTIME_DELIVERIES_TOTAL: &str = "rapport_api_realtime_deliveries_total";
const REALTIME_SESSIONS_ACTIVE: &str = "rapport_api_realtime_sessions_active";
const REALTIME_SESSION_EVICTIONS_TOTAL: &str = "rapport_api_realtime_session_evictions_total";
const LEDGER_TRANSITIONS_TOTAL: &str = "rapport_api_ledger_transitions_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

pub fn register_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_code = status.as_u16().to_string();
    let duration_seconds = elapsed.as_secs_f64();
    let result = if status.is_server_error() {
        "error"
    } else {
        "success"
    };

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code.clone(),
        "result" => result
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_code
    )
    .record(duration_seconds);

    if status.is_server_error() {
        counter!(
            HTTP_REQUEST_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
    }
}

/// `entity` is `connection` or `exchange`; `status` the state it moved into.
pub fn register_ledger_transition(entity: &'static str, status: &str) {
    counter!(
        LEDGER_TRANSITIONS_TOTAL,
        "entity" => entity,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn register_session_opened() {
    gauge!(REALTIME_SESSIONS_ACTIVE).increment(1.0);
}

pub fn register_session_closed() {
    gauge!(REALTIME_SESSIONS_ACTIVE).decrement(1.0);
}

pub fn register_session_evictions(count: usize) {
    if count > 0 {
        counter!(REALTIME_SESSION_EVICTIONS_TOTAL).increment(count as u64);
    }
}

pub struct PrometheusDeliveryObserver;

impl DeliveryObserver for PrometheusDeliveryObserver {
    fn observe(&self, event_kind: &'static str, outcome: DeliveryOutcome) {
        counter!(
            REALTIME_DELIVERIES_TOTAL,
            "event" => event_kind,
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }
}
