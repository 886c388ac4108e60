//! Pending-call table.
//!
//! Owned by exactly one session task; nothing here is shared or locked.

use std::collections::HashMap;
use std::time::Instant;

use onebot_core::{CallResponse, Echo, OneBotError, Result};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Completion handle for one call.
pub type Reply = oneshot::Sender<Result<Value>>;

/// A call handed from the bot facade to the session task.
#[derive(Debug)]
pub struct CallCommand {
    pub action: String,
    pub params: Value,
    pub reply: Reply,
}

impl CallCommand {
    pub fn new(action: impl Into<String>, params: Value) -> (Self, oneshot::Receiver<Result<Value>>) {
        let (reply, rx) = oneshot::channel();
        let command = Self {
            action: action.into(),
            params,
            reply,
        };
        (command, rx)
    }
}

#[derive(Debug)]
struct PendingCall {
    action: String,
    issued_at: Instant,
    reply: Reply,
}

#[derive(Debug, Default)]
pub struct PendingCalls {
    entries: HashMap<Echo, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, echo: Echo, action: String, reply: Reply) {
        let _ = self.entries.insert(
            echo,
            PendingCall {
                action,
                issued_at: Instant::now(),
                reply,
            },
        );
    }

    pub fn contains(&self, echo: &Echo) -> bool {
        self.entries.contains_key(echo)
    }

    /// Resolve the call `response` answers. Returns `false` when no call is
    /// waiting on its echo, e.g. a duplicate response.
    pub fn complete(&mut self, response: CallResponse) -> bool {
        let Some(call) = self.entries.remove(&response.echo) else {
            return false;
        };
        debug!(
            echo = %response.echo,
            action = %call.action,
            status = %response.status,
            elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
            "call answered"
        );
        let result = response.into_result(&call.action);
        // The caller may have given up already.
        let _ = call.reply.send(result);
        true
    }

    /// Fail `echo` without a response, e.g. when the request could not be encoded.
    pub fn fail(&mut self, echo: &Echo, error: OneBotError) -> bool {
        match self.entries.remove(echo) {
            Some(call) => {
                let _ = call.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Reject every pending call with [`OneBotError::Disconnected`].
    pub fn reject_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, call) in self.entries.drain() {
            let _ = call.reply.send(Err(OneBotError::Disconnected {
                action: call.action,
            }));
        }
        count
    }

    /// Drop entries whose caller stopped waiting (timed out or cancelled).
    pub fn prune_abandoned(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, call| !call.reply.is_closed());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(echo: &str, status: &str, data: Value) -> CallResponse {
        CallResponse::from_value(json!({
            "echo": echo,
            "status": status,
            "retcode": 0,
            "data": data,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn complete_resolves_matching_call() {
        let mut pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(Echo::from_raw("1"), "get_status".into(), tx);

        assert!(pending.complete(response("1", "ok", json!({"online": true}))));
        assert!(pending.is_empty());
        assert_eq!(rx.await.unwrap().unwrap(), json!({"online": true}));
    }

    #[tokio::test]
    async fn second_response_for_same_echo_is_ignored() {
        let mut pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(Echo::from_raw("7"), "get_status".into(), tx);

        assert!(pending.complete(response("7", "ok", json!(1))));
        assert!(!pending.complete(response("7", "ok", json!(2))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn failed_status_rejects_with_call_failed() {
        let mut pending = PendingCalls::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(Echo::from_raw("2"), "set_group_ban".into(), tx);

        assert!(pending.complete(response("2", "failed", Value::Null)));
        match rx.await.unwrap() {
            Err(OneBotError::CallFailed { action, message, .. }) => {
                assert_eq!(action, "set_group_ban");
                assert_eq!(message, onebot_core::DEFAULT_FAILURE_MESSAGE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reject_all_fails_every_call_with_disconnected() {
        let mut pending = PendingCalls::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert(Echo::from_raw("1"), "get_status".into(), tx1);
        pending.insert(Echo::from_raw("2"), "get_login_info".into(), tx2);

        assert_eq!(pending.reject_all(), 2);
        assert!(pending.is_empty());
        assert!(matches!(
            rx1.await.unwrap(),
            Err(OneBotError::Disconnected { action }) if action == "get_status"
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(OneBotError::Disconnected { .. })
        ));
    }

    #[test]
    fn prune_drops_abandoned_calls_only() {
        let mut pending = PendingCalls::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        pending.insert(Echo::from_raw("1"), "a".into(), tx1);
        pending.insert(Echo::from_raw("2"), "b".into(), tx2);

        drop(rx1);
        assert_eq!(pending.prune_abandoned(), 1);
        assert!(!pending.contains(&Echo::from_raw("1")));
        assert!(pending.contains(&Echo::from_raw("2")));
    }

    #[tokio::test]
    async fn fail_rejects_single_call() {
        let mut pending = PendingCalls::new();
        let (command, rx) = CallCommand::new("send_msg", json!({}));
        pending.insert(Echo::from_raw("9"), command.action, command.reply);

        assert!(pending.fail(
            &Echo::from_raw("9"),
            OneBotError::MalformedMessage("unencodable".into())
        ));
        assert!(matches!(
            rx.await.unwrap(),
            Err(OneBotError::MalformedMessage(_))
        ));
        assert!(!pending.fail(&Echo::from_raw("9"), OneBotError::NoConnection));
    }
}
