use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Diameter peer engine
    pub static ref DIAMETER_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("diameter_requests_total", "Diameter requests sent, by peer and command"),
        &["peer", "application_id", "command_code"]
    ).unwrap();

    pub static ref DIAMETER_ANSWERS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("diameter_answers_total", "Diameter answers received, by peer and command"),
        &["peer", "application_id", "command_code"]
    ).unwrap();

    pub static ref DIAMETER_REQUEST_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("diameter_request_errors_total", "Diameter requests failed before an answer arrived"),
        &["peer", "error"]
    ).unwrap();

    pub static ref DIAMETER_UNKNOWN_ANSWERS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("diameter_unknown_answers_total", "Answers with no matching outstanding request"),
        &["peer"]
    ).unwrap();

    pub static ref DIAMETER_PEER_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("diameter_peer_events_total", "Peer lifecycle events"),
        &["peer", "event"]
    ).unwrap();

    // RADIUS client socket
    pub static ref RADIUS_CLIENT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_client_requests_total", "RADIUS requests sent, by destination endpoint"),
        &["endpoint", "code"]
    ).unwrap();

    pub static ref RADIUS_CLIENT_RESPONSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_client_responses_total", "RADIUS responses delivered to waiters"),
        &["endpoint", "code"]
    ).unwrap();

    pub static ref RADIUS_CLIENT_RETRANSMITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_client_retransmits_total", "RADIUS request retransmissions"),
        &["endpoint"]
    ).unwrap();

    pub static ref RADIUS_CLIENT_TIMEOUTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_client_timeouts_total", "RADIUS exchanges that exhausted all tries"),
        &["endpoint"]
    ).unwrap();

    pub static ref RADIUS_CLIENT_DROPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_client_drops_total", "Datagrams dropped by the client socket"),
        &["endpoint", "reason"]
    ).unwrap();

    // RADIUS server socket
    pub static ref RADIUS_SERVER_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_server_requests", "RADIUS requests accepted by the server socket"),
        &["client", "code"]
    ).unwrap();

    pub static ref RADIUS_SERVER_DROPS: IntCounterVec = IntCounterVec::new(
        Opts::new("radius_server_drops", "Datagrams dropped by the server socket"),
        &["client", "reason"]
    ).unwrap();

    // Router
    pub static ref ROUTER_DISPATCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("router_dispatches_total", "Routing decisions, by action and outcome"),
        &["action", "target", "outcome"]
    ).unwrap();

    // HTTP ingress
    pub static ref HTTP_ROUTER_EXCHANGES: IntCounterVec = IntCounterVec::new(
        Opts::new("http_router_exchanges", "HTTP ingress exchanges, by path and status"),
        &["path", "status"]
    ).unwrap();
}

/// Register all counters with the global registry. Safe to call once at
/// startup; repeated registration is ignored.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(DIAMETER_REQUESTS_TOTAL.clone()),
        Box::new(DIAMETER_ANSWERS_TOTAL.clone()),
        Box::new(DIAMETER_REQUEST_ERRORS_TOTAL.clone()),
        Box::new(DIAMETER_UNKNOWN_ANSWERS_TOTAL.clone()),
        Box::new(DIAMETER_PEER_EVENTS_TOTAL.clone()),
        Box::new(RADIUS_CLIENT_REQUESTS_TOTAL.clone()),
        Box::new(RADIUS_CLIENT_RESPONSES_TOTAL.clone()),
        Box::new(RADIUS_CLIENT_RETRANSMITS_TOTAL.clone()),
        Box::new(RADIUS_CLIENT_TIMEOUTS_TOTAL.clone()),
        Box::new(RADIUS_CLIENT_DROPS_TOTAL.clone()),
        Box::new(RADIUS_SERVER_REQUESTS.clone()),
        Box::new(RADIUS_SERVER_DROPS.clone()),
        Box::new(ROUTER_DISPATCHES_TOTAL.clone()),
        Box::new(HTTP_ROUTER_EXCHANGES.clone()),
    ];
    for collector in collectors {
        let _ = REGISTRY.register(collector);
    }
}

/// Gather metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}
