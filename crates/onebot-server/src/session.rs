//! Per-connection session actor.
//!
//! One task per accepted peer owns the pending-call table and processes
//! inbound frames one at a time. Callers reach it only through the command
//! channel and wait on a oneshot, so the session never blocks on a caller.

use std::sync::Arc;
use std::time::Duration;

use onebot_core::{parse_frame, CallRequest, CallResponse, Echo, EchoGenerator, Event, PeerId};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::correlator::{CallCommand, PendingCalls};
use crate::dispatcher::ListenerRegistry;

const PRUNE_INTERVAL: Duration = Duration::from_secs(5);

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    /// Matched a pending call and completed it.
    Response,
    /// Classified as an event and dispatched to `listeners` many listeners.
    Event { listeners: usize },
    /// Neither a pending response nor an event.
    Ignored,
    Malformed,
}

/// Queues connecting a session to its socket tasks and callers.
pub struct SessionChannels {
    pub inbound: mpsc::Receiver<String>,
    pub outbound: mpsc::Sender<String>,
    pub commands: mpsc::Receiver<CallCommand>,
}

pub struct Session {
    peer_id: PeerId,
    listeners: Arc<ListenerRegistry>,
    echoes: Arc<EchoGenerator>,
    pending: PendingCalls,
}

impl Session {
    pub fn new(
        peer_id: PeerId,
        listeners: Arc<ListenerRegistry>,
        echoes: Arc<EchoGenerator>,
    ) -> Self {
        Self {
            peer_id,
            listeners,
            echoes,
            pending: PendingCalls::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Run until the peer goes away, the command channel closes or `cancel`
    /// fires. Calls still pending at that point fail with `Disconnected`.
    pub async fn run(mut self, channels: SessionChannels, cancel: CancellationToken) {
        let SessionChannels {
            mut inbound,
            outbound,
            mut commands,
        } = channels;

        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(peer_id = %self.peer_id, "session cancelled");
                    break;
                }
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let Some(frame) = self.issue(command) else { continue };
                    if outbound.send(frame).await.is_err() {
                        break;
                    }
                }
                frame = inbound.recv() => {
                    let Some(frame) = frame else { break };
                    let _ = self.route_inbound(&frame);
                }
                _ = prune.tick() => {
                    let pruned = self.pending.prune_abandoned();
                    if pruned > 0 {
                        debug!(peer_id = %self.peer_id, pruned, "pruned abandoned calls");
                    }
                }
            }
        }

        let rejected = self.pending.reject_all();
        if rejected > 0 {
            info!(peer_id = %self.peer_id, rejected, "rejected pending calls on disconnect");
        }
    }

    /// Register `command` as pending and encode its request frame.
    pub fn issue(&mut self, command: CallCommand) -> Option<String> {
        let CallCommand {
            action,
            params,
            reply,
        } = command;
        let echo = self.echoes.next_echo();
        let request = CallRequest::new(action.clone(), params, echo.clone());
        self.pending.insert(echo.clone(), action, reply);

        match request.to_json() {
            Ok(frame) => {
                debug!(peer_id = %self.peer_id, echo = %echo, action = %request.action, "call issued");
                Some(frame)
            }
            Err(error) => {
                warn!(echo = %echo, action = %request.action, error = %error, "failed to encode call");
                let _ = self.pending.fail(&echo, error);
                None
            }
        }
    }

    /// Route one inbound text frame to the pending table or the dispatcher.
    pub fn route_inbound(&mut self, text: &str) -> Routed {
        let value = match parse_frame(text) {
            Ok(value) => value,
            Err(error) => {
                warn!(peer_id = %self.peer_id, error = %error, "dropping malformed frame");
                return Routed::Malformed;
            }
        };

        let is_pending_response = value
            .get("echo")
            .and_then(Echo::from_value)
            .is_some_and(|echo| self.pending.contains(&echo));
        if is_pending_response {
            return match CallResponse::from_value(value) {
                Ok(response) => {
                    self.pending.complete(response);
                    Routed::Response
                }
                Err(error) => {
                    warn!(peer_id = %self.peer_id, error = %error, "dropping malformed response");
                    Routed::Malformed
                }
            };
        }

        if value.get("post_type").is_some() {
            return self.dispatch_event(value);
        }

        debug!(
            peer_id = %self.peer_id,
            echo = ?value.get("echo"),
            "dropping frame that is neither event nor pending response"
        );
        Routed::Ignored
    }

    fn dispatch_event(&self, value: Value) -> Routed {
        match Event::from_value(value) {
            Ok(event) => {
                let listeners = self.listeners.dispatch(&event);
                debug!(peer_id = %self.peer_id, key = %event.key(), listeners, "event dispatched");
                Routed::Event { listeners }
            }
            Err(error) => {
                warn!(peer_id = %self.peer_id, error = %error, "dropping malformed event");
                Routed::Malformed
            }
        }
    }
}
