//! Sans-IO peer state machine. The actor feeds it events and executes the
//! returned actions; the FSM itself never touches a socket.

use crate::base;
use crate::settings::{ConnectionPolicy, LocalNode, PeerSettings};
use radiam_codec::DiameterMessage;
use radiam_core::consts;
use radiam_dict::Dictionary;
use std::sync::Arc;

/// Watchdog ticks a peer may miss before it is declared failed
const MAX_MISSED_WATCHDOGS: u32 = 2;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Initial state, not connected
    Closed,

    /// TCP dial in progress
    Connecting,

    /// Capabilities exchange in progress
    WaitingCer,

    /// Connection established and operational
    Engaged,

    /// Disconnect exchange in progress
    Closing,
}

#[derive(Debug)]
pub enum FsmEvent {
    /// Active policy start
    Start,
    /// Dial succeeded
    ConnectionUp,
    /// Passive socket handed over by the listener
    Accepted,
    /// Dial failed or connection dropped
    ConnectionFailed,
    /// Base-protocol message received (CER/CEA, DWR/DWA, DPR/DPA)
    MessageReceived(DiameterMessage),
    /// Watchdog interval elapsed
    WatchdogTick,
    /// Graceful shutdown requested
    CloseRequested,
}

#[derive(Debug)]
pub enum FsmAction {
    /// Dial the configured address
    Connect,
    /// Serialize and write a base-protocol message
    SendMessage(DiameterMessage),
    /// The peer is engaged; notify the router
    NotifyUp,
    /// Tear down: fail outstanding requests, drop the socket, notify the
    /// router
    Down(&'static str),
}

pub struct PeerFsm {
    state: PeerState,
    settings: PeerSettings,
    local: LocalNode,
    dict: Arc<Dictionary>,
    watchdog_pending: bool,
    missed: u32,
    activity: bool,
    closing_cause: &'static str,
}

impl PeerFsm {
    pub fn new(settings: PeerSettings, local: LocalNode, dict: Arc<Dictionary>) -> Self {
        Self {
            state: PeerState::Closed,
            settings,
            local,
            dict,
            watchdog_pending: false,
            missed: 0,
            activity: false,
            closing_cause: "disconnected",
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn settings(&self) -> &PeerSettings {
        &self.settings
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    /// Record inbound traffic; suppresses the next idle watchdog
    pub fn note_activity(&mut self) {
        self.activity = true;
    }

    fn reset_link_counters(&mut self) {
        self.watchdog_pending = false;
        self.missed = 0;
        self.activity = false;
    }

    pub fn step(&mut self, event: FsmEvent) -> Vec<FsmAction> {
        let mut actions = Vec::new();

        match (self.state, event) {
            (PeerState::Closed, FsmEvent::Start) => {
                self.state = PeerState::Connecting;
                actions.push(FsmAction::Connect);
            }

            (PeerState::Closed, FsmEvent::Accepted) => {
                self.state = PeerState::WaitingCer;
                self.reset_link_counters();
            }

            (PeerState::Connecting, FsmEvent::ConnectionUp) => {
                self.state = PeerState::WaitingCer;
                self.reset_link_counters();
                actions.push(FsmAction::SendMessage(base::build_cer(
                    &self.local,
                    &self.dict,
                )));
            }

            (PeerState::Connecting, FsmEvent::ConnectionFailed) => {
                self.state = PeerState::Closed;
                actions.push(FsmAction::Down("connect failed"));
            }

            (PeerState::WaitingCer, FsmEvent::MessageReceived(msg)) => {
                actions.extend(self.on_capabilities_message(msg));
            }

            (PeerState::WaitingCer, FsmEvent::WatchdogTick) => {
                self.missed += 1;
                if self.missed >= MAX_MISSED_WATCHDOGS {
                    self.state = PeerState::Closed;
                    actions.push(FsmAction::Down("capabilities exchange timed out"));
                }
            }

            (PeerState::Engaged, FsmEvent::WatchdogTick) => {
                if self.watchdog_pending {
                    self.missed += 1;
                    if self.missed >= MAX_MISSED_WATCHDOGS {
                        // Unresponsive peer: initiate the disconnect exchange
                        self.state = PeerState::Closing;
                        self.missed = 0;
                        self.closing_cause = "watchdog expired";
                        actions.push(FsmAction::SendMessage(base::build_dpr(
                            &self.local,
                            &self.dict,
                            consts::DISCONNECT_CAUSE_REBOOTING,
                        )));
                        return actions;
                    }
                } else if !self.activity {
                    self.watchdog_pending = true;
                    actions.push(FsmAction::SendMessage(base::build_dwr(
                        &self.local,
                        &self.dict,
                    )));
                }
                self.activity = false;
            }

            (PeerState::Engaged, FsmEvent::MessageReceived(msg)) => {
                actions.extend(self.on_engaged_message(msg));
            }

            (PeerState::Engaged, FsmEvent::CloseRequested) => {
                self.state = PeerState::Closing;
                self.missed = 0;
                self.closing_cause = "disconnected";
                actions.push(FsmAction::SendMessage(base::build_dpr(
                    &self.local,
                    &self.dict,
                    consts::DISCONNECT_CAUSE_REBOOTING,
                )));
            }

            (PeerState::Closing, FsmEvent::MessageReceived(msg)) => {
                if msg.header.command_code == consts::CMD_DISCONNECT_PEER && !msg.is_request() {
                    self.state = PeerState::Closed;
                    actions.push(FsmAction::Down(self.closing_cause));
                }
            }

            (PeerState::Closing, FsmEvent::WatchdogTick) => {
                self.missed += 1;
                if self.missed >= MAX_MISSED_WATCHDOGS {
                    self.state = PeerState::Closed;
                    actions.push(FsmAction::Down(self.closing_cause));
                }
            }

            (PeerState::Closed, FsmEvent::ConnectionFailed | FsmEvent::CloseRequested) => {}

            (_, FsmEvent::ConnectionFailed) => {
                self.state = PeerState::Closed;
                actions.push(FsmAction::Down("connection lost"));
            }

            (_, FsmEvent::CloseRequested) => {
                self.state = PeerState::Closed;
                actions.push(FsmAction::Down("closed"));
            }

            (state, event) => {
                tracing::debug!(peer = %self.settings.name, ?state, ?event, "ignoring event");
            }
        }

        actions
    }

    fn on_capabilities_message(&mut self, msg: DiameterMessage) -> Vec<FsmAction> {
        let mut actions = Vec::new();

        if msg.header.command_code != consts::CMD_CAPABILITIES_EXCHANGE {
            return actions;
        }

        if msg.is_request() {
            // Passive side: validate and answer the CER
            match base::validate_capabilities(&msg, &self.settings, &self.local) {
                Ok(()) => {
                    actions.push(FsmAction::SendMessage(base::build_cea(
                        &msg,
                        &self.local,
                        &self.dict,
                        consts::RESULT_CODE_SUCCESS,
                    )));
                    self.state = PeerState::Engaged;
                    self.reset_link_counters();
                    actions.push(FsmAction::NotifyUp);
                }
                Err(reason) => {
                    actions.push(FsmAction::SendMessage(base::build_cea(
                        &msg,
                        &self.local,
                        &self.dict,
                        consts::RESULT_CODE_UNABLE_TO_COMPLY,
                    )));
                    self.state = PeerState::Closed;
                    actions.push(FsmAction::Down(reason));
                }
            }
        } else {
            // Active side: CEA for our CER
            let accepted = msg.result_code() == Some(consts::RESULT_CODE_SUCCESS)
                && base::validate_capabilities(&msg, &self.settings, &self.local).is_ok();
            if accepted {
                self.state = PeerState::Engaged;
                self.reset_link_counters();
                actions.push(FsmAction::NotifyUp);
            } else {
                self.state = PeerState::Closed;
                actions.push(FsmAction::Down("capabilities exchange rejected"));
            }
        }

        actions
    }

    fn on_engaged_message(&mut self, msg: DiameterMessage) -> Vec<FsmAction> {
        let mut actions = Vec::new();

        match (msg.header.command_code, msg.is_request()) {
            (consts::CMD_DEVICE_WATCHDOG, true) => {
                actions.push(FsmAction::SendMessage(base::build_dwa(
                    &msg,
                    &self.local,
                    &self.dict,
                )));
            }
            (consts::CMD_DEVICE_WATCHDOG, false) => {
                self.watchdog_pending = false;
                self.missed = 0;
            }
            (consts::CMD_DISCONNECT_PEER, true) => {
                actions.push(FsmAction::SendMessage(base::build_dpa(
                    &msg,
                    &self.local,
                    &self.dict,
                )));
                self.state = PeerState::Closed;
                actions.push(FsmAction::Down("peer disconnected"));
            }
            (code, request) => {
                tracing::debug!(
                    peer = %self.settings.name,
                    command_code = code,
                    request,
                    "unexpected base message"
                );
            }
        }

        actions
    }
}
