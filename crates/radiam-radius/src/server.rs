//! RADIUS server socket: client authentication, authenticator validation,
//! handler dispatch in worker tasks.

use async_trait::async_trait;
use radiam_codec::RadiusPacket;
use radiam_core::{consts, Result};
use radiam_dict::Dictionary;
use radiam_metrics as metrics;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// A network access device allowed to talk to this server
#[derive(Debug, Clone)]
pub struct RadiusClientEntry {
    pub name: String,
    pub ip: IpAddr,
    pub secret: String,
}

/// Handler for decoded requests; the returned packet is encoded against the
/// request's authenticator and sent back to the source.
#[async_trait]
pub trait RadiusHandler: Send + Sync {
    async fn handle(&self, request: RadiusPacket, source: SocketAddr) -> Result<RadiusPacket>;
}

pub struct RadiusServerSocket {
    socket: Arc<UdpSocket>,
    clients: HashMap<IpAddr, RadiusClientEntry>,
    handler: Arc<dyn RadiusHandler>,
    dict: Arc<Dictionary>,
}

impl RadiusServerSocket {
    pub async fn bind(
        bind_addr: &str,
        clients: Vec<RadiusClientEntry>,
        handler: Arc<dyn RadiusHandler>,
        dict: Arc<Dictionary>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        Ok(Self {
            socket,
            clients: clients.into_iter().map(|c| (c.ip, c)).collect(),
            handler,
            dict,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop; runs until the socket fails
    pub async fn run(self) {
        if let Ok(addr) = self.socket.local_addr() {
            info!(%addr, "radius server listening");
        }

        let mut buf = vec![0u8; 4096];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "server socket receive failed");
                    return;
                }
            };
            self.dispatch(&buf[..len], from);
        }
    }

    fn dispatch(&self, data: &[u8], from: SocketAddr) {
        let Some(client) = self.clients.get(&from.ip()) else {
            metrics::RADIUS_SERVER_DROPS
                .with_label_values(&["unknown", "unknown-client"])
                .inc();
            debug!(%from, "datagram from unknown client dropped");
            return;
        };

        if data.len() < 20 {
            metrics::RADIUS_SERVER_DROPS
                .with_label_values(&[&client.name, "malformed"])
                .inc();
            return;
        }

        // Non-Access-Request packets carry a computed authenticator we can
        // check before doing any work
        if data[0] != consts::RADIUS_ACCESS_REQUEST
            && !RadiusPacket::validate_request_authenticator(data, &client.secret)
        {
            metrics::RADIUS_SERVER_DROPS
                .with_label_values(&[&client.name, "bad-authenticator"])
                .inc();
            warn!(%from, client = %client.name, "request authenticator mismatch");
            return;
        }

        if RadiusPacket::verify_message_authenticator(data, &client.secret, None) == Some(false) {
            metrics::RADIUS_SERVER_DROPS
                .with_label_values(&[&client.name, "bad-message-authenticator"])
                .inc();
            warn!(%from, client = %client.name, "message authenticator mismatch");
            return;
        }

        let request = match RadiusPacket::decode(data, &client.secret, None, &self.dict) {
            Ok(packet) => packet,
            Err(e) => {
                metrics::RADIUS_SERVER_DROPS
                    .with_label_values(&[&client.name, "undecodable"])
                    .inc();
                warn!(%from, client = %client.name, error = %e, "dropping undecodable request");
                return;
            }
        };

        metrics::RADIUS_SERVER_REQUESTS
            .with_label_values(&[&client.name, &request.code.to_string()])
            .inc();

        let handler = Arc::clone(&self.handler);
        let socket = Arc::clone(&self.socket);
        let dict = Arc::clone(&self.dict);
        let secret = client.secret.clone();
        let client_name = client.name.clone();
        let request_authenticator = request.authenticator;
        let had_message_authenticator = request.attribute("Message-Authenticator").is_some();

        tokio::spawn(async move {
            match handler.handle(request, from).await {
                Ok(mut response) => {
                    match response.encode_response(
                        &secret,
                        &request_authenticator,
                        had_message_authenticator,
                        &dict,
                    ) {
                        Ok(bytes) => {
                            if let Err(e) = socket.send_to(&bytes, from).await {
                                warn!(%from, error = %e, "failed to send response");
                            }
                        }
                        Err(e) => {
                            warn!(%from, error = %e, "failed to encode response");
                        }
                    }
                }
                Err(e) => {
                    metrics::RADIUS_SERVER_DROPS
                        .with_label_values(&[&client_name, "handler-error"])
                        .inc();
                    debug!(%from, error = %e, "handler failed, no response sent");
                }
            }
        });
    }
}
