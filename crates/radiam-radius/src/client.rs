//! RADIUS client socket: one UDP socket multiplexing many concurrent
//! exchanges, with retransmission and per-destination identifier pools.

use crate::id_manager::IdentifierManager;
use dashmap::DashMap;
use radiam_codec::RadiusPacket;
use radiam_core::{RadiamError, Result};
use radiam_dict::Dictionary;
use radiam_metrics as metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

/// How long a timed-out identifier is withheld so late duplicates do not hit
/// a fresh exchange
const RELEASE_GRACE: Duration = Duration::from_secs(2);

struct Outstanding {
    reply: oneshot::Sender<Result<RadiusPacket>>,
    request_authenticator: [u8; 16],
    secret: String,
}

/// UDP request/response multiplexer. A single reader task owns the receive
/// path and delivers responses to waiters by (source endpoint, identifier).
pub struct RadiusClientSocket {
    socket: Arc<UdpSocket>,
    outstanding: Arc<DashMap<(SocketAddr, u8), Outstanding>>,
    identifiers: Arc<IdentifierManager>,
    dict: Arc<Dictionary>,
    reader: JoinHandle<()>,
}

impl RadiusClientSocket {
    pub async fn bind(
        bind_addr: &str,
        identifier_wait: Duration,
        dict: Arc<Dictionary>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let outstanding: Arc<DashMap<(SocketAddr, u8), Outstanding>> = Arc::new(DashMap::new());

        let reader = tokio::spawn(Self::read_loop(
            Arc::clone(&socket),
            Arc::clone(&outstanding),
            Arc::clone(&dict),
        ));

        Ok(Self {
            socket,
            outstanding,
            identifiers: Arc::new(IdentifierManager::new(identifier_wait)),
            dict,
            reader,
        })
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        outstanding: Arc<DashMap<(SocketAddr, u8), Outstanding>>,
        dict: Arc<Dictionary>,
    ) {
        let mut buf = vec![0u8; 4096];
        loop {
            let (len, from) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "client socket receive failed");
                    let keys: Vec<_> = outstanding.iter().map(|e| *e.key()).collect();
                    for key in keys {
                        if let Some((_, pending)) = outstanding.remove(&key) {
                            let _ = pending.reply.send(Err(RadiamError::SocketClosed));
                        }
                    }
                    return;
                }
            };
            let data = &buf[..len];
            if data.len() < 20 {
                metrics::RADIUS_CLIENT_DROPS_TOTAL
                    .with_label_values(&[&from.to_string(), "malformed"])
                    .inc();
                continue;
            }

            let identifier = data[1];
            let key = (from, identifier);
            let Some((_, pending)) = outstanding.remove(&key) else {
                metrics::RADIUS_CLIENT_DROPS_TOTAL
                    .with_label_values(&[&from.to_string(), "unsolicited"])
                    .inc();
                debug!(%from, identifier, "dropping unsolicited datagram");
                continue;
            };

            if !RadiusPacket::validate_response_authenticator(
                data,
                &pending.request_authenticator,
                &pending.secret,
            ) {
                metrics::RADIUS_CLIENT_DROPS_TOTAL
                    .with_label_values(&[&from.to_string(), "bad-authenticator"])
                    .inc();
                outstanding.insert(key, pending);
                continue;
            }

            if RadiusPacket::verify_message_authenticator(
                data,
                &pending.secret,
                Some(&pending.request_authenticator),
            ) == Some(false)
            {
                metrics::RADIUS_CLIENT_DROPS_TOTAL
                    .with_label_values(&[&from.to_string(), "bad-message-authenticator"])
                    .inc();
                outstanding.insert(key, pending);
                continue;
            }

            match RadiusPacket::decode(
                data,
                &pending.secret,
                Some(&pending.request_authenticator),
                &dict,
            ) {
                Ok(response) => {
                    metrics::RADIUS_CLIENT_RESPONSES_TOTAL
                        .with_label_values(&[&from.to_string(), &response.code.to_string()])
                        .inc();
                    let _ = pending.reply.send(Ok(response));
                }
                Err(e) => {
                    warn!(%from, error = %e, "dropping undecodable response");
                    metrics::RADIUS_CLIENT_DROPS_TOTAL
                        .with_label_values(&[&from.to_string(), "undecodable"])
                        .inc();
                    outstanding.insert(key, pending);
                }
            }
        }
    }

    /// Send a request and await the response, retransmitting with the same
    /// identifier and authenticator up to `tries` times.
    pub async fn exchange(
        &self,
        destination: SocketAddr,
        mut packet: RadiusPacket,
        secret: &str,
        per_try_timeout: Duration,
        tries: u32,
        with_message_authenticator: bool,
    ) -> Result<RadiusPacket> {
        let identifier = self.identifiers.allocate(destination).await?;

        let result = self
            .exchange_with_identifier(
                destination,
                &mut packet,
                secret,
                per_try_timeout,
                tries.max(1),
                identifier,
                with_message_authenticator,
            )
            .await;

        match &result {
            Err(RadiamError::Timeout) => {
                // Withhold the identifier briefly so a late duplicate cannot
                // be taken for a fresh exchange's response
                let identifiers = Arc::clone(&self.identifiers);
                tokio::spawn(async move {
                    tokio::time::sleep(RELEASE_GRACE).await;
                    identifiers.release(destination, identifier).await;
                });
            }
            _ => self.identifiers.release(destination, identifier).await,
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn exchange_with_identifier(
        &self,
        destination: SocketAddr,
        packet: &mut RadiusPacket,
        secret: &str,
        per_try_timeout: Duration,
        tries: u32,
        identifier: u8,
        with_message_authenticator: bool,
    ) -> Result<RadiusPacket> {
        let bytes =
            packet.encode_request(secret, identifier, with_message_authenticator, &self.dict)?;

        let (reply, mut rx) = oneshot::channel();
        let key = (destination, identifier);
        self.outstanding.insert(
            key,
            Outstanding {
                reply,
                request_authenticator: packet.authenticator,
                secret: secret.to_string(),
            },
        );

        let endpoint = destination.to_string();
        for attempt in 0..tries {
            if attempt == 0 {
                metrics::RADIUS_CLIENT_REQUESTS_TOTAL
                    .with_label_values(&[&endpoint, &packet.code.to_string()])
                    .inc();
            } else {
                metrics::RADIUS_CLIENT_RETRANSMITS_TOTAL
                    .with_label_values(&[&endpoint])
                    .inc();
            }

            if let Err(e) = self.socket.send_to(&bytes, destination).await {
                self.outstanding.remove(&key);
                return Err(e.into());
            }

            match tokio::time::timeout(per_try_timeout, &mut rx).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => return Err(RadiamError::SocketClosed),
                Err(_) => continue,
            }
        }

        self.outstanding.remove(&key);
        metrics::RADIUS_CLIENT_TIMEOUTS_TOTAL
            .with_label_values(&[&endpoint])
            .inc();
        Err(RadiamError::Timeout)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Stop the reader and fail all waiters with `SocketClosed`
    pub fn close(&self) {
        self.reader.abort();
        let keys: Vec<_> = self.outstanding.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, pending)) = self.outstanding.remove(&key) {
                let _ = pending.reply.send(Err(RadiamError::SocketClosed));
            }
        }
    }
}

impl Drop for RadiusClientSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
