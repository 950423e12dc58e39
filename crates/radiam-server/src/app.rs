//! Wires configuration into running components: peer table, Diameter
//! listener, RADIUS sockets, router and HTTP ingress.

use crate::http::{self, AppState};
use radiam_config::{PeerPolicyConfig, ServerConfig};
use radiam_core::Result;
use radiam_dict::Dictionary;
use radiam_peer::{
    ConnectionPolicy, DiameterHandler, LocalNode, Peer, PeerListener, PeerSettings,
};
use radiam_radius::{RadiusClientEntry, RadiusClientSocket, RadiusServerSocket};
use radiam_router::{RadiusRouteParams, Router, RouterSettings};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::info;

fn peer_settings(config: &radiam_config::PeerConfig) -> PeerSettings {
    PeerSettings {
        name: config.name.clone(),
        origin_host: config.diameter_host.clone(),
        address: config.address.clone(),
        allowed_ingress: config.allowed_ingress.clone(),
        watchdog_interval: Duration::from_secs(config.watchdog_interval_seconds),
        connection_policy: match config.connection_policy {
            PeerPolicyConfig::Active => ConnectionPolicy::Active,
            PeerPolicyConfig::Passive => ConnectionPolicy::Passive,
        },
    }
}

fn local_node(config: &radiam_config::DiameterConfig) -> LocalNode {
    let origin_state_id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    LocalNode {
        origin_host: config.origin_host.clone(),
        origin_realm: config.origin_realm.clone(),
        host_ip: config.host_ip.unwrap_or(IpAddr::from([127, 0, 0, 1])),
        product_name: config.product_name.clone(),
        origin_state_id,
        auth_application_ids: config.auth_application_ids.clone(),
        acct_application_ids: config.acct_application_ids.clone(),
    }
}

/// Build every component and serve until the HTTP ingress stops
pub async fn run(config: ServerConfig, dict: Arc<Dictionary>) -> Result<()> {
    let default_timeout = Duration::from_millis(config.request_timeout_millis);

    let identifier_wait = config
        .radius
        .as_ref()
        .map(|r| Duration::from_millis(r.identifier_wait_millis))
        .unwrap_or(Duration::from_millis(500));
    let radius_client = Arc::new(
        RadiusClientSocket::bind("0.0.0.0:0", identifier_wait, Arc::clone(&dict)).await?,
    );

    let settings = RouterSettings {
        diameter_rules: config
            .diameter
            .as_ref()
            .map(|d| d.routing_rules.clone())
            .unwrap_or_default(),
        radius_rules: config
            .radius
            .as_ref()
            .map(|r| r.routing_rules.clone())
            .unwrap_or_default(),
        server_groups: config
            .radius
            .as_ref()
            .map(|r| r.server_groups.clone())
            .unwrap_or_default(),
        quarantine: Duration::from_secs(config.quarantine_seconds),
    };
    let router = Router::new(settings, Arc::clone(&dict), radius_client);

    let (events_tx, events_rx) = mpsc::channel(256);
    tokio::spawn(Arc::clone(&router).run_events(events_rx));
    router.health().spawn_sweeper(Duration::from_secs(5));

    if let Some(diameter) = &config.diameter {
        let local = local_node(diameter);
        let ingress: Arc<dyn DiameterHandler> = router.diameter_ingress(default_timeout);

        let mut passive = Vec::new();
        for peer_config in &diameter.peers {
            let settings = peer_settings(peer_config);
            match settings.connection_policy {
                ConnectionPolicy::Active => {
                    let peer = Peer::spawn_active(
                        settings,
                        local.clone(),
                        Arc::clone(&dict),
                        events_tx.clone(),
                        Some(Arc::clone(&ingress)),
                    );
                    router.add_peer(peer);
                }
                ConnectionPolicy::Passive => passive.push(settings),
            }
        }

        let listener = TcpListener::bind(&diameter.bind_address).await?;
        info!(bind = %diameter.bind_address, peers = diameter.peers.len(), "diameter engine started");
        tokio::spawn(
            PeerListener::new(
                passive,
                local,
                Arc::clone(&dict),
                events_tx.clone(),
                Some(ingress),
            )
            .run(listener),
        );
    }

    if let Some(radius) = &config.radius {
        let ingress = router.radius_ingress(RadiusRouteParams {
            timeout: default_timeout,
            ..RadiusRouteParams::default()
        });
        let clients: Vec<RadiusClientEntry> = radius
            .clients
            .iter()
            .map(|c| RadiusClientEntry {
                name: c.name.clone(),
                ip: c.ip,
                secret: c.secret.clone(),
            })
            .collect();

        for bind in [&radius.auth_bind, &radius.acct_bind] {
            let server = RadiusServerSocket::bind(
                bind,
                clients.clone(),
                ingress.clone(),
                Arc::clone(&dict),
            )
            .await?;
            tokio::spawn(server.run());
        }
        info!(auth = %radius.auth_bind, acct = %radius.acct_bind, "radius engine started");
    }

    let state = AppState {
        router,
        default_timeout,
    };
    http::serve(state, &config.http).await
}
