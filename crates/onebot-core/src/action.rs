//! Outbound call requests and the responses the peer echoes back.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{OneBotError, Result};
use crate::ids::Echo;

/// Failure message used when the peer rejects a call without explaining why.
pub const DEFAULT_FAILURE_MESSAGE: &str = "call failed";

/// `{action, params, echo}` as sent to the peer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallRequest {
    pub action: String,
    pub params: Value,
    pub echo: Echo,
}

impl CallRequest {
    /// A `null` params value is sent as an empty object; OneBot peers expect
    /// `params` to always be present.
    pub fn new(action: impl Into<String>, params: Value, echo: Echo) -> Self {
        let params = if params.is_null() {
            Value::Object(Map::new())
        } else {
            params
        };
        Self {
            action: action.into(),
            params,
            echo,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A response frame matched to a pending call by its echo.
#[derive(Clone, Debug, PartialEq)]
pub struct CallResponse {
    pub echo: Echo,
    pub status: String,
    pub retcode: Option<i64>,
    pub data: Value,
    pub message: Option<String>,
    pub wording: Option<String>,
}

impl CallResponse {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(OneBotError::MalformedMessage(
                "response is not a JSON object".into(),
            ));
        };
        let echo = obj
            .get("echo")
            .and_then(Echo::from_value)
            .ok_or_else(|| OneBotError::MalformedMessage("response has no echo".into()))?;

        let text = |v: Value| match v {
            Value::String(s) => Some(s),
            _ => None,
        };

        Ok(Self {
            echo,
            status: obj.remove("status").and_then(text).unwrap_or_default(),
            retcode: obj.get("retcode").and_then(Value::as_i64),
            data: obj.remove("data").unwrap_or(Value::Null),
            message: obj.remove("message").and_then(text),
            wording: obj.remove("wording").and_then(text),
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Human-readable failure reason: `message`, then `wording`, then the default.
    pub fn failure_message(&self) -> String {
        [&self.message, &self.wording]
            .into_iter()
            .flatten()
            .find(|m| !m.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_owned())
    }

    /// Resolve to `data` on `"ok"`, otherwise to [`OneBotError::CallFailed`].
    pub fn into_result(self, action: &str) -> Result<Value> {
        if self.is_ok() {
            return Ok(self.data);
        }
        Err(OneBotError::CallFailed {
            action: action.to_owned(),
            retcode: self.retcode,
            message: self.failure_message(),
        })
    }
}
