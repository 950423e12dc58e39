//! Peer actor: a single task owning one connection, its outstanding-request
//! map and its watchdog. Public methods on the [`Peer`] handle submit
//! commands over a channel; waiters receive answers on per-request oneshot
//! channels.

use crate::base;
use crate::fsm::{FsmAction, FsmEvent, PeerFsm, PeerState};
use crate::settings::{ConnectionPolicy, LocalNode, PeerSettings};
use async_trait::async_trait;
use radiam_codec::DiameterMessage;
use radiam_core::{consts, RadiamError, Result, Transport};
use radiam_dict::Dictionary;
use radiam_metrics as metrics;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Upper bound accepted for one Diameter frame
const MAX_FRAME: usize = 1 << 20;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler for incoming non-base requests; the returned answer is written on
/// the same connection.
#[async_trait]
pub trait DiameterHandler: Send + Sync {
    async fn handle(&self, request: DiameterMessage) -> Result<DiameterMessage>;
}

/// Lifecycle notifications consumed by the router
#[derive(Debug)]
pub enum PeerEvent {
    Up(Peer),
    Down { peer: String, reason: String },
}

enum PeerCommand {
    Send {
        message: DiameterMessage,
        deadline: Instant,
        reply: oneshot::Sender<Result<DiameterMessage>>,
    },
    Close,
    State {
        reply: oneshot::Sender<PeerState>,
    },
}

/// Clonable handle to a peer actor
#[derive(Clone)]
pub struct Peer {
    name: Arc<str>,
    origin_host: Arc<str>,
    commands: mpsc::Sender<PeerCommand>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer").field("name", &self.name).finish()
    }
}

impl Peer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin_host(&self) -> &str {
        &self.origin_host
    }

    /// Send a request and await its answer. Fails with `PeerNotEngaged`
    /// before the capabilities exchange completes, `Timeout` on deadline
    /// expiry and `PeerClosed` if the connection goes away first.
    pub async fn send(
        &self,
        message: DiameterMessage,
        timeout: Duration,
    ) -> Result<DiameterMessage> {
        let deadline = Instant::now() + timeout;
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(PeerCommand::Send {
                message,
                deadline,
                reply,
            })
            .await
            .map_err(|_| RadiamError::PeerClosed(self.name.to_string()))?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RadiamError::PeerClosed(self.name.to_string())),
            Err(_) => Err(RadiamError::Timeout),
        }
    }

    /// Initiate a graceful DPR/DPA shutdown
    pub async fn close(&self) {
        let _ = self.commands.send(PeerCommand::Close).await;
    }

    pub async fn state(&self) -> PeerState {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(PeerCommand::State { reply })
            .await
            .is_err()
        {
            return PeerState::Closed;
        }
        rx.await.unwrap_or(PeerState::Closed)
    }

    /// Spawn an actor that dials the configured address
    pub fn spawn_active(
        settings: PeerSettings,
        local: LocalNode,
        dict: Arc<Dictionary>,
        events: mpsc::Sender<PeerEvent>,
        handler: Option<Arc<dyn DiameterHandler>>,
    ) -> Peer {
        Self::spawn(settings, local, dict, events, handler, None)
    }

    /// Spawn an actor for a connection accepted by the listener
    pub fn spawn_passive(
        socket: Box<dyn Transport>,
        settings: PeerSettings,
        local: LocalNode,
        dict: Arc<Dictionary>,
        events: mpsc::Sender<PeerEvent>,
        handler: Option<Arc<dyn DiameterHandler>>,
    ) -> Peer {
        Self::spawn(settings, local, dict, events, handler, Some(socket))
    }

    fn spawn(
        settings: PeerSettings,
        local: LocalNode,
        dict: Arc<Dictionary>,
        events: mpsc::Sender<PeerEvent>,
        handler: Option<Arc<dyn DiameterHandler>>,
        accepted: Option<Box<dyn Transport>>,
    ) -> Peer {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (answers_tx, answers_rx) = mpsc::channel(64);

        let handle = Peer {
            name: settings.name.clone().into(),
            origin_host: settings.origin_host.clone().into(),
            commands: cmd_tx,
        };

        let policy = if accepted.is_some() {
            ConnectionPolicy::Passive
        } else {
            ConnectionPolicy::Active
        };

        let mut watchdog =
            tokio::time::interval_at(Instant::now() + settings.watchdog_interval, settings.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut actor = PeerActor {
            fsm: PeerFsm::new(settings, local, Arc::clone(&dict)),
            policy,
            dict,
            commands: cmd_rx,
            events,
            handler,
            self_handle: handle.clone(),
            writer: None,
            frames: None,
            reader_task: None,
            answers_tx,
            answers_rx,
            outstanding: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_hop_by_hop: rand::random(),
            next_end_to_end: initial_end_to_end_id(),
            watchdog,
            closing_requested: false,
            commands_closed: false,
            announced_down: false,
        };

        tokio::spawn(async move {
            if let Some(socket) = accepted {
                actor.attach(socket);
            }
            actor.run().await;
        });

        handle
    }
}

/// RFC 6733 §3: end-to-end ids start with time-derived high bits and random
/// low bits, then increment.
fn initial_end_to_end_id() -> u32 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    (secs << 20) | (rand::random::<u32>() & 0x000F_FFFF)
}

struct PendingRequest {
    reply: oneshot::Sender<Result<DiameterMessage>>,
}

enum LoopEvent {
    Command(Option<PeerCommand>),
    Frame(Option<std::io::Result<Vec<u8>>>),
    HandlerAnswer(Option<DiameterMessage>),
    Watchdog,
    Deadline,
}

struct PeerActor {
    fsm: PeerFsm,
    policy: ConnectionPolicy,
    dict: Arc<Dictionary>,
    commands: mpsc::Receiver<PeerCommand>,
    events: mpsc::Sender<PeerEvent>,
    handler: Option<Arc<dyn DiameterHandler>>,
    self_handle: Peer,
    writer: Option<WriteHalf<Box<dyn Transport>>>,
    frames: Option<mpsc::Receiver<std::io::Result<Vec<u8>>>>,
    reader_task: Option<JoinHandle<()>>,
    answers_tx: mpsc::Sender<DiameterMessage>,
    answers_rx: mpsc::Receiver<DiameterMessage>,
    outstanding: HashMap<u32, PendingRequest>,
    deadlines: BinaryHeap<Reverse<(Instant, u32)>>,
    next_hop_by_hop: u32,
    next_end_to_end: u32,
    watchdog: Interval,
    closing_requested: bool,
    commands_closed: bool,
    announced_down: bool,
}

async fn read_frame<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut head = [0u8; 4];
    reader.read_exact(&mut head).await?;
    if head[0] != 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported diameter version",
        ));
    }
    let length = u32::from_be_bytes([0, head[1], head[2], head[3]]) as usize;
    if !(20..=MAX_FRAME).contains(&length) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "implausible frame length",
        ));
    }
    let mut frame = vec![0u8; length];
    frame[..4].copy_from_slice(&head);
    reader.read_exact(&mut frame[4..]).await?;
    Ok(frame)
}

impl PeerActor {
    fn attach(&mut self, socket: Box<dyn Transport>) {
        let (mut read_half, write_half): (ReadHalf<_>, WriteHalf<_>) = tokio::io::split(socket);
        let (tx, rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(frame) => {
                        if tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        self.writer = Some(write_half);
        self.frames = Some(rx);
        self.reader_task = Some(task);
    }

    async fn run(mut self) {
        let initial = match self.policy {
            ConnectionPolicy::Active => FsmEvent::Start,
            ConnectionPolicy::Passive => FsmEvent::Accepted,
        };
        self.dispatch(initial).await;

        loop {
            let next_deadline = self
                .deadlines
                .peek()
                .map(|Reverse((deadline, _))| *deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            let commands_open = !self.commands_closed;
            let event = if let Some(frames) = self.frames.as_mut() {
                tokio::select! {
                    cmd = self.commands.recv(), if commands_open => LoopEvent::Command(cmd),
                    frame = frames.recv() => LoopEvent::Frame(frame),
                    answer = self.answers_rx.recv() => LoopEvent::HandlerAnswer(answer),
                    _ = self.watchdog.tick() => LoopEvent::Watchdog,
                    _ = tokio::time::sleep_until(next_deadline) => LoopEvent::Deadline,
                }
            } else {
                tokio::select! {
                    cmd = self.commands.recv(), if commands_open => LoopEvent::Command(cmd),
                    _ = self.watchdog.tick() => LoopEvent::Watchdog,
                    _ = tokio::time::sleep_until(next_deadline) => LoopEvent::Deadline,
                }
            };

            match event {
                LoopEvent::Command(Some(cmd)) => self.on_command(cmd).await,
                LoopEvent::Command(None) => {
                    self.commands_closed = true;
                    self.closing_requested = true;
                    self.dispatch(FsmEvent::CloseRequested).await;
                }
                LoopEvent::Frame(Some(Ok(frame))) => self.on_frame(frame).await,
                LoopEvent::Frame(Some(Err(e))) => {
                    debug!(peer = %self.fsm.settings().name, error = %e, "read failed");
                    self.dispatch(FsmEvent::ConnectionFailed).await;
                }
                LoopEvent::Frame(None) => {
                    self.dispatch(FsmEvent::ConnectionFailed).await;
                }
                LoopEvent::HandlerAnswer(Some(answer)) => {
                    if self.write_message(&answer).await.is_err() {
                        self.dispatch(FsmEvent::ConnectionFailed).await;
                    }
                }
                LoopEvent::HandlerAnswer(None) => {}
                LoopEvent::Watchdog => {
                    if self.fsm.state() == PeerState::Closed {
                        if self.policy == ConnectionPolicy::Active && !self.closing_requested {
                            // Reconnect on the watchdog cadence
                            self.dispatch(FsmEvent::Start).await;
                        }
                    } else {
                        self.dispatch(FsmEvent::WatchdogTick).await;
                    }
                }
                LoopEvent::Deadline => self.expire_requests(),
            }

            if self.fsm.state() == PeerState::Closed
                && (self.closing_requested || self.policy == ConnectionPolicy::Passive)
            {
                break;
            }
        }

        self.teardown("actor stopped").await;
    }

    async fn dispatch(&mut self, event: FsmEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for action in self.fsm.step(event) {
                match action {
                    FsmAction::Connect => {
                        self.announced_down = false;
                        let address = self.fsm.settings().address.clone();
                        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
                            .await
                        {
                            Ok(Ok(stream)) => {
                                info!(peer = %self.fsm.settings().name, %address, "connected");
                                self.attach(Box::new(stream));
                                queue.push_back(FsmEvent::ConnectionUp);
                            }
                            Ok(Err(e)) => {
                                warn!(peer = %self.fsm.settings().name, %address, error = %e, "connect failed");
                                queue.push_back(FsmEvent::ConnectionFailed);
                            }
                            Err(_) => {
                                warn!(peer = %self.fsm.settings().name, %address, "connect timed out");
                                queue.push_back(FsmEvent::ConnectionFailed);
                            }
                        }
                    }
                    FsmAction::SendMessage(mut message) => {
                        if message.is_request() {
                            self.assign_ids(&mut message);
                        }
                        if self.write_message(&message).await.is_err() {
                            queue.push_back(FsmEvent::ConnectionFailed);
                        }
                    }
                    FsmAction::NotifyUp => {
                        self.announced_down = false;
                        info!(peer = %self.fsm.settings().name, "peer engaged");
                        metrics::DIAMETER_PEER_EVENTS_TOTAL
                            .with_label_values(&[&self.fsm.settings().name, "up"])
                            .inc();
                        let _ = self.events.send(PeerEvent::Up(self.self_handle.clone())).await;
                    }
                    FsmAction::Down(reason) => {
                        self.teardown(reason).await;
                    }
                }
            }
        }
    }

    fn assign_ids(&mut self, message: &mut DiameterMessage) {
        loop {
            self.next_hop_by_hop = self.next_hop_by_hop.wrapping_add(1);
            if !self.outstanding.contains_key(&self.next_hop_by_hop) {
                break;
            }
        }
        message.header.hop_by_hop_id = self.next_hop_by_hop;
        self.next_end_to_end = self.next_end_to_end.wrapping_add(1);
        message.header.end_to_end_id = self.next_end_to_end;
    }

    async fn write_message(&mut self, message: &DiameterMessage) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(RadiamError::PeerNotEngaged(
                self.fsm.settings().name.clone(),
            ));
        };
        let bytes = message.encode();
        writer.write_all(&bytes).await?;
        Ok(())
    }

    async fn on_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::Send {
                mut message,
                deadline,
                reply,
            } => {
                if self.fsm.state() != PeerState::Engaged {
                    let _ = reply.send(Err(RadiamError::PeerNotEngaged(
                        self.fsm.settings().name.clone(),
                    )));
                    return;
                }

                self.assign_ids(&mut message);
                metrics::DIAMETER_REQUESTS_TOTAL
                    .with_label_values(&[
                        &self.fsm.settings().name,
                        &message.header.application_id.to_string(),
                        &message.header.command_code.to_string(),
                    ])
                    .inc();

                let hop_by_hop = message.header.hop_by_hop_id;
                match self.write_message(&message).await {
                    Ok(()) => {
                        self.outstanding
                            .insert(hop_by_hop, PendingRequest { reply });
                        self.deadlines.push(Reverse((deadline, hop_by_hop)));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        self.dispatch(FsmEvent::ConnectionFailed).await;
                    }
                }
            }
            PeerCommand::Close => {
                self.closing_requested = true;
                self.dispatch(FsmEvent::CloseRequested).await;
            }
            PeerCommand::State { reply } => {
                let _ = reply.send(self.fsm.state());
            }
        }
    }

    async fn on_frame(&mut self, frame: Vec<u8>) {
        let message = match DiameterMessage::decode(&frame, &self.dict) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %self.fsm.settings().name, error = %e, "dropping undecodable frame");
                return;
            }
        };

        self.fsm.note_activity();

        if matches!(
            message.header.command_code,
            consts::CMD_CAPABILITIES_EXCHANGE
                | consts::CMD_DEVICE_WATCHDOG
                | consts::CMD_DISCONNECT_PEER
        ) {
            self.dispatch(FsmEvent::MessageReceived(message)).await;
            return;
        }

        if message.is_request() {
            self.handle_request(message);
        } else {
            self.correlate_answer(message);
        }
    }

    fn handle_request(&mut self, request: DiameterMessage) {
        let answers = self.answers_tx.clone();
        let dict = Arc::clone(&self.dict);
        let local = self.fsm.local().clone();
        let peer = self.fsm.settings().name.clone();

        match self.handler.clone() {
            Some(handler) => {
                tokio::spawn(async move {
                    let answer = match handler.handle(request.clone()).await {
                        Ok(answer) => answer,
                        Err(e) => {
                            warn!(%peer, error = %e, "handler failed");
                            base::build_error_answer(
                                &request,
                                &local,
                                &dict,
                                e.to_result_code(),
                                &e.to_string(),
                            )
                        }
                    };
                    let _ = answers.send(answer).await;
                });
            }
            None => {
                debug!(%peer, command_code = request.header.command_code, "no handler registered");
                let answer = base::build_error_answer(
                    &request,
                    &local,
                    &dict,
                    consts::RESULT_CODE_UNABLE_TO_DELIVER,
                    "no handler registered",
                );
                tokio::spawn(async move {
                    let _ = answers.send(answer).await;
                });
            }
        }
    }

    fn correlate_answer(&mut self, answer: DiameterMessage) {
        let hop_by_hop = answer.header.hop_by_hop_id;
        match self.outstanding.remove(&hop_by_hop) {
            Some(pending) => {
                metrics::DIAMETER_ANSWERS_TOTAL
                    .with_label_values(&[
                        &self.fsm.settings().name,
                        &answer.header.application_id.to_string(),
                        &answer.header.command_code.to_string(),
                    ])
                    .inc();
                let _ = pending.reply.send(Ok(answer));
            }
            None => {
                metrics::DIAMETER_UNKNOWN_ANSWERS_TOTAL
                    .with_label_values(&[&self.fsm.settings().name])
                    .inc();
                debug!(
                    peer = %self.fsm.settings().name,
                    hop_by_hop,
                    "answer without outstanding request"
                );
            }
        }
    }

    fn expire_requests(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((deadline, hop_by_hop))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if let Some(pending) = self.outstanding.remove(&hop_by_hop) {
                metrics::DIAMETER_REQUEST_ERRORS_TOTAL
                    .with_label_values(&[&self.fsm.settings().name, "timeout"])
                    .inc();
                let _ = pending.reply.send(Err(RadiamError::Timeout));
            }
        }
    }

    async fn teardown(&mut self, reason: &str) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.frames = None;
        self.deadlines.clear();

        for (_, pending) in self.outstanding.drain() {
            let _ = pending
                .reply
                .send(Err(RadiamError::PeerClosed(self.fsm.settings().name.clone())));
        }

        if !self.announced_down {
            self.announced_down = true;
            info!(peer = %self.fsm.settings().name, reason, "peer down");
            metrics::DIAMETER_PEER_EVENTS_TOTAL
                .with_label_values(&[&self.fsm.settings().name, "down"])
                .inc();
            let _ = self
                .events
                .send(PeerEvent::Down {
                    peer: self.fsm.settings().name.clone(),
                    reason: reason.to_string(),
                })
                .await;
        }
    }
}
