use crate::actor::{DiameterHandler, Peer, PeerEvent};
use crate::settings::{LocalNode, PeerSettings};
use radiam_dict::Dictionary;
use radiam_metrics as metrics;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Accepts inbound Diameter connections and hands each socket to a passive
/// peer actor. The connecting address must match a configured peer's allowed
/// ingress addresses; anything else is dropped.
pub struct PeerListener {
    peers: Vec<PeerSettings>,
    local: LocalNode,
    dict: Arc<Dictionary>,
    events: mpsc::Sender<PeerEvent>,
    handler: Option<Arc<dyn DiameterHandler>>,
}

impl PeerListener {
    pub fn new(
        peers: Vec<PeerSettings>,
        local: LocalNode,
        dict: Arc<Dictionary>,
        events: mpsc::Sender<PeerEvent>,
        handler: Option<Arc<dyn DiameterHandler>>,
    ) -> Self {
        Self {
            peers,
            local,
            dict,
            events,
            handler,
        }
    }

    /// Accept loop; runs until the listener fails
    pub async fn run(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "diameter listener started");
        }

        loop {
            match listener.accept().await {
                Ok((socket, remote)) => {
                    let Some(settings) = self
                        .peers
                        .iter()
                        .find(|peer| peer.allowed_ingress.contains(&remote.ip()))
                    else {
                        warn!(%remote, "connection from unconfigured address dropped");
                        metrics::DIAMETER_PEER_EVENTS_TOTAL
                            .with_label_values(&["unknown", "rejected"])
                            .inc();
                        continue;
                    };

                    info!(peer = %settings.name, %remote, "inbound connection");
                    // The actor announces itself to the router once engaged
                    let _ = Peer::spawn_passive(
                        Box::new(socket),
                        settings.clone(),
                        self.local.clone(),
                        Arc::clone(&self.dict),
                        self.events.clone(),
                        self.handler.clone(),
                    );
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }
}
