//! End-to-end peer tests over loopback TCP: capabilities exchange,
//! request/answer correlation, watchdog failure and graceful disconnect.

use async_trait::async_trait;
use radiam_codec::{AvpValue, DiameterMessage};
use radiam_core::consts;
use radiam_core::{RadiamError, Result};
use radiam_dict::Dictionary;
use radiam_peer::{
    base, DiameterHandler, LocalNode, Peer, PeerEvent, PeerListener, PeerSettings, PeerState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn client_node() -> LocalNode {
    let mut node = LocalNode::new("client.example.com", "example.com");
    node.auth_application_ids = vec![4];
    node
}

fn server_node() -> LocalNode {
    let mut node = LocalNode::new("server.example.com", "example.com");
    node.auth_application_ids = vec![4];
    node
}

struct CreditControlHandler {
    dict: Arc<Dictionary>,
    local: LocalNode,
}

#[async_trait]
impl DiameterHandler for CreditControlHandler {
    async fn handle(&self, request: DiameterMessage) -> Result<DiameterMessage> {
        let mut answer = DiameterMessage::answer_to(&request);
        answer
            .push(&self.dict, "Result-Code", AvpValue::Unsigned32(2001))
            .unwrap();
        answer
            .push(
                &self.dict,
                "Origin-Host",
                AvpValue::DiameterIdentity(self.local.origin_host.clone()),
            )
            .unwrap();
        answer
            .push(
                &self.dict,
                "Origin-Realm",
                AvpValue::DiameterIdentity(self.local.origin_realm.clone()),
            )
            .unwrap();
        if let Some(user) = request.str_value("User-Name") {
            answer
                .push(
                    &self.dict,
                    "User-Name",
                    AvpValue::Utf8String(user.to_string()),
                )
                .unwrap();
        }
        Ok(answer)
    }
}

async fn expect_up(events: &mut mpsc::Receiver<PeerEvent>) -> Peer {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for peer event")
            .expect("event channel closed");
        if let PeerEvent::Up(peer) = event {
            return peer;
        }
    }
}

async fn expect_down(events: &mut mpsc::Receiver<PeerEvent>) -> String {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for peer event")
            .expect("event channel closed");
        if let PeerEvent::Down { reason, .. } = event {
            return reason;
        }
    }
}

fn ccr(dict: &Dictionary, session: &str, user: &str) -> DiameterMessage {
    let mut request = DiameterMessage::request(4, 272);
    request
        .push(dict, "Session-Id", AvpValue::Utf8String(session.to_string()))
        .unwrap();
    request
        .push(
            dict,
            "Origin-Host",
            AvpValue::DiameterIdentity("client.example.com".to_string()),
        )
        .unwrap();
    request
        .push(
            dict,
            "Origin-Realm",
            AvpValue::DiameterIdentity("example.com".to_string()),
        )
        .unwrap();
    request
        .push(dict, "User-Name", AvpValue::Utf8String(user.to_string()))
        .unwrap();
    request
}

#[tokio::test]
async fn request_answer_round_trip() {
    let dict = Arc::new(Dictionary::base());

    // Server side: listener with a passive peer definition and a handler
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();

    let mut passive = PeerSettings::new("nas", "client.example.com", "");
    passive.allowed_ingress = vec!["127.0.0.1".parse().unwrap()];
    passive.watchdog_interval = Duration::from_secs(5);

    let (server_events_tx, _server_events) = mpsc::channel(16);
    let handler = Arc::new(CreditControlHandler {
        dict: Arc::clone(&dict),
        local: server_node(),
    });
    tokio::spawn(
        PeerListener::new(
            vec![passive],
            server_node(),
            Arc::clone(&dict),
            server_events_tx,
            Some(handler),
        )
        .run(listener),
    );

    // Client side: active peer toward the listener
    let mut active = PeerSettings::new("upstream", "server.example.com", &server_addr.to_string());
    active.watchdog_interval = Duration::from_secs(5);

    let (client_events_tx, mut client_events) = mpsc::channel(16);
    let peer = Peer::spawn_active(
        active,
        client_node(),
        Arc::clone(&dict),
        client_events_tx,
        None,
    );

    let engaged = expect_up(&mut client_events).await;
    assert_eq!(engaged.name(), "upstream");

    // Two concurrent exchanges must correlate independently
    let first = peer.send(ccr(&dict, "s-1", "alice"), Duration::from_secs(1));
    let second = peer.send(ccr(&dict, "s-2", "bob"), Duration::from_secs(1));
    let (first, second) = tokio::join!(first, second);

    let first = first.unwrap();
    assert_eq!(first.result_code(), Some(2001));
    assert_eq!(first.session_id(), Some("s-1"));
    assert_eq!(first.str_value("User-Name"), Some("alice"));

    let second = second.unwrap();
    assert_eq!(second.session_id(), Some("s-2"));
    assert_eq!(second.str_value("User-Name"), Some("bob"));

    // Graceful shutdown: DPR/DPA then a down event
    peer.close().await;
    let reason = expect_down(&mut client_events).await;
    assert_eq!(reason, "disconnected");
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    let length = u32::from_be_bytes([0, head[1], head[2], head[3]]) as usize;
    let mut frame = vec![0u8; length];
    frame[..4].copy_from_slice(&head);
    stream.read_exact(&mut frame[4..]).await?;
    Ok(frame)
}

#[tokio::test]
async fn watchdog_timeout_disconnects_peer_and_fails_outstanding() {
    let dict = Arc::new(Dictionary::base());

    // A peer that completes the capabilities exchange, then goes silent:
    // every later frame is reported to the test but never answered
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();
    let (frames_tx, mut frames) = mpsc::channel::<DiameterMessage>(32);
    let silent_dict = Arc::clone(&dict);
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let frame = read_frame(&mut socket).await.unwrap();
        let cer = DiameterMessage::decode(&frame, &silent_dict).unwrap();
        assert_eq!(cer.header.command_code, consts::CMD_CAPABILITIES_EXCHANGE);

        let remote = server_node();
        let cea = base::build_cea(&cer, &remote, &silent_dict, consts::RESULT_CODE_SUCCESS);
        socket.write_all(&cea.encode()).await.unwrap();

        while let Ok(frame) = read_frame(&mut socket).await {
            if let Ok(message) = DiameterMessage::decode(&frame, &silent_dict) {
                let _ = frames_tx.send(message).await;
            }
        }
    });

    let mut settings = PeerSettings::new("flaky", "server.example.com", &server_addr.to_string());
    settings.watchdog_interval = Duration::from_millis(200);

    let (events_tx, mut events) = mpsc::channel(16);
    let peer = Peer::spawn_active(
        settings,
        client_node(),
        Arc::clone(&dict),
        events_tx,
        None,
    );

    let _ = expect_up(&mut events).await;

    let request = ccr(&dict, "s-9", "carol");
    let pending = tokio::spawn({
        let peer = peer.clone();
        async move { peer.send(request, Duration::from_secs(5)).await }
    });

    // The watchdog must give up with a DPR on the wire, not a bare close
    let mut saw_dwr = false;
    let dpr = loop {
        let message = tokio::time::timeout(Duration::from_secs(3), frames.recv())
            .await
            .expect("peer never initiated the disconnect exchange")
            .expect("mock connection closed before a DPR was seen");
        match message.header.command_code {
            consts::CMD_DEVICE_WATCHDOG => saw_dwr = true,
            consts::CMD_DISCONNECT_PEER => break message,
            _ => {}
        }
    };
    assert!(saw_dwr, "DPR arrived without a preceding DWR");
    assert!(dpr.is_request());

    // The DPA stays unanswered, so the peer sits in Closing before it
    // finally tears down
    assert_eq!(peer.state().await, PeerState::Closing);

    // The outstanding request fails once the peer closes
    let result = tokio::time::timeout(Duration::from_secs(3), pending)
        .await
        .expect("send did not resolve before the disconnect completed")
        .expect("send task panicked");
    assert!(matches!(result, Err(RadiamError::PeerClosed(_))));

    let reason = expect_down(&mut events).await;
    assert_eq!(reason, "watchdog expired");
}

#[tokio::test]
async fn send_fails_before_engagement() {
    let dict = Arc::new(Dictionary::base());

    // Nothing listens on this address; the peer stays un-engaged
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = unused.local_addr().unwrap();
    drop(unused);

    let mut settings = PeerSettings::new("dark", "server.example.com", &addr.to_string());
    settings.watchdog_interval = Duration::from_secs(5);

    let (events_tx, _events) = mpsc::channel(16);
    let peer = Peer::spawn_active(
        settings,
        client_node(),
        Arc::clone(&dict),
        events_tx,
        None,
    );

    let result = peer
        .send(ccr(&dict, "s-0", "dave"), Duration::from_millis(500))
        .await;
    assert!(matches!(
        result,
        Err(RadiamError::PeerNotEngaged(_)) | Err(RadiamError::Timeout)
    ));
}
