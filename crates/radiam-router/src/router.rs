//! The routing core: accepts requests from peer connections, server sockets
//! or the HTTP ingress, matches them against ordered rules and dispatches to
//! local handlers, remote HTTP endpoints, Diameter peer groups or RADIUS
//! server groups, with quarantine-aware failover.

use crate::health::HealthTable;
use crate::rules::{
    find_diameter_rule, find_radius_rule, DiameterRoutingRule, RadiusRoutingRule,
    RadiusServerGroup, RouteAction, RoutePolicy,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use radiam_codec::{DiameterMessage, RadiusPacket};
use radiam_core::{RadiamError, Result};
use radiam_dict::Dictionary;
use radiam_metrics as metrics;
use radiam_peer::{DiameterHandler, Peer, PeerEvent};
use radiam_radius::{RadiusClientSocket, RadiusHandler};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Rotate the live-target list according to the policy. The round-robin
/// cursor is monotonic per group and survives health transitions.
pub fn order_targets<T>(mut live: Vec<T>, policy: RoutePolicy, cursor: u64) -> Vec<T> {
    if live.len() > 1 {
        match policy {
            RoutePolicy::FixedOrder => {}
            RoutePolicy::RoundRobin => {
                let start = (cursor % live.len() as u64) as usize;
                live.rotate_left(start);
            }
            RoutePolicy::Random => {
                let start = rand::thread_rng().gen_range(0..live.len());
                live.rotate_left(start);
            }
        }
    }
    live
}

/// Per-request overrides for RADIUS routing
#[derive(Debug, Clone)]
pub struct RadiusRouteParams {
    /// Per-try timeout handed to the client socket
    pub timeout: Duration,
    /// How many servers of the group to try
    pub tries: u32,
    /// Tries per server with the same identifier
    pub server_tries: u32,
    /// Overrides the per-server secret when set
    pub secret: Option<String>,
}

impl Default for RadiusRouteParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            tries: 2,
            server_tries: 1,
            secret: None,
        }
    }
}

pub struct RouterSettings {
    pub diameter_rules: Vec<DiameterRoutingRule>,
    pub radius_rules: Vec<RadiusRoutingRule>,
    pub server_groups: Vec<RadiusServerGroup>,
    /// Back-off applied to a target after a transport failure or timeout
    pub quarantine: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            diameter_rules: Vec::new(),
            radius_rules: Vec::new(),
            server_groups: Vec::new(),
            quarantine: Duration::from_secs(30),
        }
    }
}

pub struct Router {
    settings: RouterSettings,
    server_groups: HashMap<String, RadiusServerGroup>,
    dict: Arc<Dictionary>,
    radius_client: Arc<RadiusClientSocket>,
    peers: Mutex<HashMap<String, Peer>>,
    engaged: Mutex<HashSet<String>>,
    health: Arc<HealthTable>,
    rr_cursors: Mutex<HashMap<String, u64>>,
    diameter_handlers: Mutex<HashMap<String, Arc<dyn DiameterHandler>>>,
    radius_handlers: Mutex<HashMap<String, Arc<dyn RadiusHandler>>>,
    http: reqwest::Client,
}

impl Router {
    pub fn new(
        settings: RouterSettings,
        dict: Arc<Dictionary>,
        radius_client: Arc<RadiusClientSocket>,
    ) -> Arc<Self> {
        let health = Arc::new(HealthTable::new(settings.quarantine));
        let server_groups = settings
            .server_groups
            .iter()
            .map(|group| (group.name.clone(), group.clone()))
            .collect();
        Arc::new(Self {
            settings,
            server_groups,
            dict,
            radius_client,
            peers: Mutex::new(HashMap::new()),
            engaged: Mutex::new(HashSet::new()),
            health,
            rr_cursors: Mutex::new(HashMap::new()),
            diameter_handlers: Mutex::new(HashMap::new()),
            radius_handlers: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        })
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dict
    }

    pub fn health(&self) -> &Arc<HealthTable> {
        &self.health
    }

    /// Register a peer handle; engagement is tracked via peer events
    pub fn add_peer(&self, peer: Peer) {
        self.peers.lock().insert(peer.name().to_string(), peer);
    }

    pub fn register_diameter_handler(&self, name: &str, handler: Arc<dyn DiameterHandler>) {
        self.diameter_handlers
            .lock()
            .insert(name.to_string(), handler);
    }

    pub fn register_radius_handler(&self, name: &str, handler: Arc<dyn RadiusHandler>) {
        self.radius_handlers
            .lock()
            .insert(name.to_string(), handler);
    }

    /// Consume peer lifecycle events to keep the engaged-peer snapshot and
    /// the peer table current.
    pub async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::Up(peer) => {
                    info!(peer = peer.name(), "peer available for routing");
                    self.engaged.lock().insert(peer.name().to_string());
                    self.peers.lock().insert(peer.name().to_string(), peer);
                }
                PeerEvent::Down { peer, reason } => {
                    info!(peer = %peer, %reason, "peer removed from routing");
                    self.engaged.lock().remove(&peer);
                }
            }
        }
    }

    fn next_cursor(&self, group: &str) -> u64 {
        let mut cursors = self.rr_cursors.lock();
        let cursor = cursors.entry(group.to_string()).or_insert(0);
        let current = *cursor;
        *cursor += 1;
        current
    }

    /// Direct exchange with a named peer, bypassing routing rules
    pub async fn send_to_peer(
        &self,
        name: &str,
        message: DiameterMessage,
        timeout: Duration,
    ) -> Result<DiameterMessage> {
        let peer = self.peers.lock().get(name).cloned();
        match peer {
            Some(peer) => peer.send(message, timeout).await,
            None => Err(RadiamError::NoAvailableTargets(format!(
                "unknown peer {name}"
            ))),
        }
    }

    // ========================================
    // Diameter dispatch
    // ========================================

    pub async fn route_diameter(
        &self,
        message: DiameterMessage,
        timeout: Duration,
    ) -> Result<DiameterMessage> {
        let realm = message.destination_realm().unwrap_or("").to_string();
        let application_id = message.header.application_id;

        let Some(rule) =
            find_diameter_rule(&self.settings.diameter_rules, &realm, application_id).cloned()
        else {
            metrics::ROUTER_DISPATCHES_TOTAL
                .with_label_values(&["diameter", "none", "no-rule"])
                .inc();
            return Err(RadiamError::NoAvailableTargets(format!(
                "no rule for realm {realm} application {application_id}"
            )));
        };

        match &rule.action {
            RouteAction::LocalHandler { handler } => {
                self.invoke_diameter_handler(&rule, handler, message).await
            }
            RouteAction::RemoteHttp { url } => {
                self.dispatch_diameter_http(&rule, url, &message, timeout)
                    .await
            }
            RouteAction::PeerGroup { peers, policy } => {
                self.dispatch_peer_group(peers, *policy, message, timeout)
                    .await
            }
            RouteAction::ServerGroup { group } => Err(RadiamError::Config(format!(
                "diameter rule cannot target radius server group {group}"
            ))),
        }
    }

    async fn invoke_diameter_handler(
        &self,
        rule: &DiameterRoutingRule,
        name: &str,
        message: DiameterMessage,
    ) -> Result<DiameterMessage> {
        let Some(handler) = self.diameter_handlers.lock().get(name).cloned() else {
            return Err(RadiamError::Handler(format!("no handler named {name}")));
        };

        let attempts = if rule.retry_on_handler_error { 2 } else { 1 };
        let mut last = None;
        for _ in 0..attempts {
            match handler.handle(message.clone()).await {
                Ok(answer) => {
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["local-handler", name, "ok"])
                        .inc();
                    return Ok(answer);
                }
                Err(e) => {
                    debug!(handler = name, error = %e, "handler failed");
                    last = Some(RadiamError::Handler(e.to_string()));
                }
            }
        }
        metrics::ROUTER_DISPATCHES_TOTAL
            .with_label_values(&["local-handler", name, "error"])
            .inc();
        Err(last.expect("at least one attempt"))
    }

    async fn dispatch_diameter_http(
        &self,
        rule: &DiameterRoutingRule,
        url: &str,
        message: &DiameterMessage,
        timeout: Duration,
    ) -> Result<DiameterMessage> {
        let attempts = if rule.retry_on_handler_error { 2 } else { 1 };
        let mut last = RadiamError::Handler("http dispatch failed".to_string());

        for _ in 0..attempts {
            let sent = self
                .http
                .post(url)
                .timeout(timeout)
                .json(message)
                .send()
                .await;
            match sent {
                Ok(response) if response.status().is_success() => {
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["remote-http", url, "ok"])
                        .inc();
                    return response
                        .json::<DiameterMessage>()
                        .await
                        .map_err(|e| RadiamError::Handler(e.to_string()));
                }
                Ok(response) => {
                    last = RadiamError::Handler(format!("http status {}", response.status()));
                }
                Err(e) if e.is_timeout() => last = RadiamError::Timeout,
                Err(e) => last = RadiamError::Handler(e.to_string()),
            }
        }
        metrics::ROUTER_DISPATCHES_TOTAL
            .with_label_values(&["remote-http", url, "error"])
            .inc();
        Err(last)
    }

    async fn dispatch_peer_group(
        &self,
        group: &[String],
        policy: RoutePolicy,
        message: DiameterMessage,
        timeout: Duration,
    ) -> Result<DiameterMessage> {
        let group_key = group.join(",");

        let live: Vec<Peer> = {
            let engaged = self.engaged.lock();
            let peers = self.peers.lock();
            group
                .iter()
                .filter(|name| engaged.contains(*name) && self.health.is_available(name))
                .filter_map(|name| peers.get(name).cloned())
                .collect()
        };

        if live.is_empty() {
            metrics::ROUTER_DISPATCHES_TOTAL
                .with_label_values(&["peer-group", &group_key, "no-targets"])
                .inc();
            return Err(RadiamError::NoAvailableTargets(group_key));
        }

        let cursor = self.next_cursor(&group_key);
        let ordered = order_targets(live, policy, cursor);

        let mut last = None;
        for peer in ordered {
            match peer.send(message.clone(), timeout).await {
                Ok(answer) => {
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["peer-group", peer.name(), "ok"])
                        .inc();
                    return Ok(answer);
                }
                Err(e) if e.is_retryable() => {
                    warn!(peer = peer.name(), error = %e, "peer failed, quarantining");
                    self.health.quarantine(peer.name());
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["peer-group", peer.name(), "failover"])
                        .inc();
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(RadiamError::NoAvailableTargets(group_key)))
    }

    // ========================================
    // RADIUS dispatch
    // ========================================

    pub async fn route_radius(
        &self,
        packet: RadiusPacket,
        destination: &str,
        params: RadiusRouteParams,
    ) -> Result<RadiusPacket> {
        if !destination.is_empty() {
            return self.dispatch_server_group(destination, packet, &params).await;
        }

        let Some(rule) = find_radius_rule(&self.settings.radius_rules, packet.code).cloned()
        else {
            metrics::ROUTER_DISPATCHES_TOTAL
                .with_label_values(&["radius", "none", "no-rule"])
                .inc();
            return Err(RadiamError::NoAvailableTargets(format!(
                "no rule for radius code {}",
                packet.code
            )));
        };

        match &rule.action {
            RouteAction::ServerGroup { group } => {
                self.dispatch_server_group(group, packet, &params).await
            }
            RouteAction::LocalHandler { handler } => {
                self.invoke_radius_handler(&rule, handler, packet).await
            }
            RouteAction::RemoteHttp { url } => {
                self.dispatch_radius_http(&rule, url, &packet, params.timeout)
                    .await
            }
            RouteAction::PeerGroup { .. } => Err(RadiamError::Config(
                "radius rule cannot target a diameter peer group".to_string(),
            )),
        }
    }

    async fn invoke_radius_handler(
        &self,
        rule: &RadiusRoutingRule,
        name: &str,
        packet: RadiusPacket,
    ) -> Result<RadiusPacket> {
        let Some(handler) = self.radius_handlers.lock().get(name).cloned() else {
            return Err(RadiamError::Handler(format!("no handler named {name}")));
        };

        let source: SocketAddr = "0.0.0.0:0".parse().expect("static address");
        let attempts = if rule.retry_on_handler_error { 2 } else { 1 };
        let mut last = None;
        for _ in 0..attempts {
            match handler.handle(packet.clone(), source).await {
                Ok(response) => {
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["local-handler", name, "ok"])
                        .inc();
                    return Ok(response);
                }
                Err(e) => last = Some(RadiamError::Handler(e.to_string())),
            }
        }
        metrics::ROUTER_DISPATCHES_TOTAL
            .with_label_values(&["local-handler", name, "error"])
            .inc();
        Err(last.expect("at least one attempt"))
    }

    async fn dispatch_radius_http(
        &self,
        rule: &RadiusRoutingRule,
        url: &str,
        packet: &RadiusPacket,
        timeout: Duration,
    ) -> Result<RadiusPacket> {
        let attempts = if rule.retry_on_handler_error { 2 } else { 1 };
        let mut last = RadiamError::Handler("http dispatch failed".to_string());

        for _ in 0..attempts {
            let sent = self
                .http
                .post(url)
                .timeout(timeout)
                .json(packet)
                .send()
                .await;
            match sent {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<RadiusPacket>()
                        .await
                        .map_err(|e| RadiamError::Handler(e.to_string()));
                }
                Ok(response) => {
                    last = RadiamError::Handler(format!("http status {}", response.status()));
                }
                Err(e) if e.is_timeout() => last = RadiamError::Timeout,
                Err(e) => last = RadiamError::Handler(e.to_string()),
            }
        }
        Err(last)
    }

    async fn dispatch_server_group(
        &self,
        group_name: &str,
        packet: RadiusPacket,
        params: &RadiusRouteParams,
    ) -> Result<RadiusPacket> {
        let Some(group) = self.server_groups.get(group_name) else {
            return Err(RadiamError::NoAvailableTargets(format!(
                "unknown server group {group_name}"
            )));
        };

        let live: Vec<_> = group
            .servers
            .iter()
            .filter(|server| self.health.is_available(&server.name))
            .cloned()
            .collect();

        if live.is_empty() {
            metrics::ROUTER_DISPATCHES_TOTAL
                .with_label_values(&["server-group", group_name, "no-targets"])
                .inc();
            return Err(RadiamError::NoAvailableTargets(group_name.to_string()));
        }

        let cursor = self.next_cursor(group_name);
        let ordered = order_targets(live, group.policy, cursor);

        let mut last = None;
        for server in ordered.into_iter().take(params.tries.max(1) as usize) {
            let endpoint = server.endpoint_for(packet.code);
            let secret = params.secret.as_deref().unwrap_or(&server.secret);

            match self
                .radius_client
                .exchange(
                    endpoint,
                    packet.clone(),
                    secret,
                    params.timeout,
                    params.server_tries.max(1),
                    false,
                )
                .await
            {
                Ok(response) => {
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["server-group", &server.name, "ok"])
                        .inc();
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    warn!(server = %server.name, error = %e, "server failed, quarantining");
                    self.health.quarantine(&server.name);
                    metrics::ROUTER_DISPATCHES_TOTAL
                        .with_label_values(&["server-group", &server.name, "failover"])
                        .inc();
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(RadiamError::NoAvailableTargets(group_name.to_string())))
    }

    // ========================================
    // Ingress queues
    // ========================================

    /// Handler handed to peer actors: requests travel to the router over a
    /// queue, so peers hold only a channel back-edge.
    pub fn diameter_ingress(self: &Arc<Self>, timeout: Duration) -> Arc<DiameterIngress> {
        let (queue, mut rx) = mpsc::channel::<DiameterIngressRequest>(256);
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    let result = router.route_diameter(request.message, timeout).await;
                    let _ = request.reply.send(result);
                });
            }
        });
        Arc::new(DiameterIngress { queue })
    }

    /// Handler handed to RADIUS server sockets
    pub fn radius_ingress(self: &Arc<Self>, params: RadiusRouteParams) -> Arc<RadiusIngress> {
        let (queue, mut rx) = mpsc::channel::<RadiusIngressRequest>(256);
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let router = Arc::clone(&router);
                let params = params.clone();
                tokio::spawn(async move {
                    let result = router.route_radius(request.packet, "", params).await;
                    let _ = request.reply.send(result);
                });
            }
        });
        Arc::new(RadiusIngress { queue })
    }
}

struct DiameterIngressRequest {
    message: DiameterMessage,
    reply: oneshot::Sender<Result<DiameterMessage>>,
}

pub struct DiameterIngress {
    queue: mpsc::Sender<DiameterIngressRequest>,
}

#[async_trait]
impl DiameterHandler for DiameterIngress {
    async fn handle(&self, request: DiameterMessage) -> Result<DiameterMessage> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(DiameterIngressRequest {
                message: request,
                reply,
            })
            .await
            .map_err(|_| RadiamError::SocketClosed)?;
        rx.await.map_err(|_| RadiamError::SocketClosed)?
    }
}

struct RadiusIngressRequest {
    packet: RadiusPacket,
    reply: oneshot::Sender<Result<RadiusPacket>>,
}

pub struct RadiusIngress {
    queue: mpsc::Sender<RadiusIngressRequest>,
}

#[async_trait]
impl RadiusHandler for RadiusIngress {
    async fn handle(&self, request: RadiusPacket, _source: SocketAddr) -> Result<RadiusPacket> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(RadiusIngressRequest {
                packet: request,
                reply,
            })
            .await
            .map_err(|_| RadiamError::SocketClosed)?;
        rx.await.map_err(|_| RadiamError::SocketClosed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_order_keeps_configured_order() {
        let ordered = order_targets(vec!["a", "b", "c"], RoutePolicy::FixedOrder, 5);
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_round_robin_rotates_by_cursor() {
        assert_eq!(
            order_targets(vec!["a", "b", "c"], RoutePolicy::RoundRobin, 0),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            order_targets(vec!["a", "b", "c"], RoutePolicy::RoundRobin, 1),
            vec!["b", "c", "a"]
        );
        assert_eq!(
            order_targets(vec!["a", "b", "c"], RoutePolicy::RoundRobin, 4),
            vec!["b", "c", "a"]
        );
    }

    #[test]
    fn test_random_is_a_rotation_of_live_targets() {
        for _ in 0..20 {
            let ordered = order_targets(vec!["a", "b", "c"], RoutePolicy::Random, 0);
            assert_eq!(ordered.len(), 3);
            let start = ordered[0];
            let expected = match start {
                "a" => vec!["a", "b", "c"],
                "b" => vec!["b", "c", "a"],
                "c" => vec!["c", "a", "b"],
                _ => panic!("unexpected element"),
            };
            assert_eq!(ordered, expected);
        }
    }

    #[test]
    fn test_single_target_is_untouched() {
        assert_eq!(
            order_targets(vec!["only"], RoutePolicy::Random, 9),
            vec!["only"]
        );
    }
}
