//! Client/server exchanges over loopback UDP: round trip, retransmission
//! against a lossy server, and drop accounting.

use async_trait::async_trait;
use radiam_codec::{AvpValue, RadiusPacket};
use radiam_core::consts::*;
use radiam_core::{RadiamError, Result};
use radiam_dict::Dictionary;
use radiam_metrics as metrics;
use radiam_radius::{RadiusClientEntry, RadiusClientSocket, RadiusHandler, RadiusServerSocket};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::Duration;

fn dict() -> Arc<Dictionary> {
    Arc::new(Dictionary::base())
}

fn access_request(dict: &Dictionary, user: &str) -> RadiusPacket {
    let mut packet = RadiusPacket::new(RADIUS_ACCESS_REQUEST);
    packet
        .push(dict, "User-Name", AvpValue::Utf8String(user.to_string()))
        .unwrap();
    packet
        .push(
            dict,
            "User-Password",
            AvpValue::OctetString(b"pa55word".to_vec()),
        )
        .unwrap();
    packet
}

struct AcceptHandler {
    dict: Arc<Dictionary>,
}

#[async_trait]
impl RadiusHandler for AcceptHandler {
    async fn handle(&self, request: RadiusPacket, _source: SocketAddr) -> Result<RadiusPacket> {
        assert_eq!(
            request.attribute("User-Password").unwrap().value,
            AvpValue::OctetString(b"pa55word".to_vec())
        );
        let mut response = RadiusPacket::response_to(&request, RADIUS_ACCESS_ACCEPT);
        response
            .push(&self.dict, "Class", AvpValue::OctetString(b"ok".to_vec()))
            .unwrap();
        Ok(response)
    }
}

#[tokio::test]
async fn access_request_round_trip() {
    let dict = dict();

    let server = RadiusServerSocket::bind(
        "127.0.0.1:0",
        vec![RadiusClientEntry {
            name: "test-nas".to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            secret: "secret".to_string(),
        }],
        Arc::new(AcceptHandler {
            dict: Arc::clone(&dict),
        }),
        Arc::clone(&dict),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let client = RadiusClientSocket::bind("127.0.0.1:0", Duration::from_millis(100), Arc::clone(&dict))
        .await
        .unwrap();

    let response = client
        .exchange(
            server_addr,
            access_request(&dict, "alice"),
            "secret",
            Duration::from_secs(1),
            3,
            false,
        )
        .await
        .unwrap();

    assert_eq!(response.code, RADIUS_ACCESS_ACCEPT);
    assert_eq!(
        response.attribute("Class").unwrap().value,
        AvpValue::OctetString(b"ok".to_vec())
    );
}

#[tokio::test]
async fn first_datagram_lost_then_retransmit_succeeds() {
    let dict = dict();

    // A raw test double that drops the first datagram and answers the second
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server.local_addr().unwrap();
    let double_dict = Arc::clone(&dict);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];

        // First try: swallowed
        let _ = server.recv_from(&mut buf).await.unwrap();

        // Second try: answer with Access-Accept / Class=ok
        let (len, from) = server.recv_from(&mut buf).await.unwrap();
        let request = RadiusPacket::decode(&buf[..len], "secret", None, &double_dict).unwrap();
        let mut auth = [0u8; 16];
        auth.copy_from_slice(&buf[4..20]);

        let mut response = RadiusPacket::response_to(&request, RADIUS_ACCESS_ACCEPT);
        response
            .push(
                &double_dict,
                "Class",
                AvpValue::OctetString(b"ok".to_vec()),
            )
            .unwrap();
        let bytes = response
            .encode_response("secret", &auth, false, &double_dict)
            .unwrap();
        server.send_to(&bytes, from).await.unwrap();
    });

    let client = RadiusClientSocket::bind("127.0.0.1:0", Duration::from_millis(100), Arc::clone(&dict))
        .await
        .unwrap();

    let retransmits_before = metrics::RADIUS_CLIENT_RETRANSMITS_TOTAL
        .with_label_values(&[&server_addr.to_string()])
        .get();

    let response = client
        .exchange(
            server_addr,
            access_request(&dict, "bob"),
            "secret",
            Duration::from_millis(200),
            3,
            false,
        )
        .await
        .unwrap();

    assert_eq!(response.code, RADIUS_ACCESS_ACCEPT);
    assert_eq!(
        response.attribute("Class").unwrap().value,
        AvpValue::OctetString(b"ok".to_vec())
    );

    let retransmits_after = metrics::RADIUS_CLIENT_RETRANSMITS_TOTAL
        .with_label_values(&[&server_addr.to_string()])
        .get();
    assert_eq!(retransmits_after - retransmits_before, 1);
}

#[tokio::test]
async fn unknown_client_is_dropped_silently() {
    let dict = dict();

    // No configured clients at all: everything is dropped
    let server = RadiusServerSocket::bind(
        "127.0.0.1:0",
        vec![],
        Arc::new(AcceptHandler {
            dict: Arc::clone(&dict),
        }),
        Arc::clone(&dict),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let drops_before = metrics::RADIUS_SERVER_DROPS
        .with_label_values(&["unknown", "unknown-client"])
        .get();

    let client = RadiusClientSocket::bind("127.0.0.1:0", Duration::from_millis(100), Arc::clone(&dict))
        .await
        .unwrap();
    let result = client
        .exchange(
            server_addr,
            access_request(&dict, "mallory"),
            "secret",
            Duration::from_millis(150),
            2,
            false,
        )
        .await;

    // No response is ever sent
    assert!(matches!(result, Err(RadiamError::Timeout)));

    let drops_after = metrics::RADIUS_SERVER_DROPS
        .with_label_values(&["unknown", "unknown-client"])
        .get();
    assert!(drops_after - drops_before >= 1);
}

#[tokio::test]
async fn unsolicited_datagrams_do_not_break_the_socket() {
    let dict = dict();

    let client = RadiusClientSocket::bind("127.0.0.1:0", Duration::from_millis(100), Arc::clone(&dict))
        .await
        .unwrap();
    let client_addr = client.local_addr().unwrap();

    // Fire an unsolicited, well-formed response at the client socket
    let stray = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let stray_addr = stray.local_addr().unwrap();
    let auth = [9u8; 16];
    let mut response = RadiusPacket::response_to(
        &RadiusPacket::new(RADIUS_ACCESS_REQUEST),
        RADIUS_ACCESS_ACCEPT,
    );
    let bytes = response
        .encode_response("secret", &auth, false, &dict)
        .unwrap();
    stray.send_to(&bytes, client_addr).await.unwrap();

    // Give the reader a beat to count the drop
    tokio::time::sleep(Duration::from_millis(50)).await;
    let drops = metrics::RADIUS_CLIENT_DROPS_TOTAL
        .with_label_values(&[&stray_addr.to_string(), "unsolicited"])
        .get();
    assert!(drops >= 1);

    // The socket still works for a real exchange afterwards
    let server = RadiusServerSocket::bind(
        "127.0.0.1:0",
        vec![RadiusClientEntry {
            name: "test-nas".to_string(),
            ip: "127.0.0.1".parse().unwrap(),
            secret: "secret".to_string(),
        }],
        Arc::new(AcceptHandler {
            dict: Arc::clone(&dict),
        }),
        Arc::clone(&dict),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let response = client
        .exchange(
            server_addr,
            access_request(&dict, "carol"),
            "secret",
            Duration::from_secs(1),
            2,
            false,
        )
        .await
        .unwrap();
    assert_eq!(response.code, RADIUS_ACCESS_ACCEPT);
}
