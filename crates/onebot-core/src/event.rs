//! Inbound events and their classification keys.
//!
//! An event is routed by `"<post_type>.<detail_type>"`, e.g. `"message.group"`
//! or `"meta_event.heartbeat"`. The detail type is read from whichever of the
//! four OneBot discriminator fields the event carries, and is empty when it
//! carries none of them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{OneBotError, Result};

/// Discriminator fields in lookup order.
const DETAIL_FIELDS: [&str; 4] = [
    "message_type",
    "notice_type",
    "request_type",
    "meta_event_type",
];

/// Parse one text frame into a JSON object.
pub fn parse_frame(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| OneBotError::MalformedMessage(format!("invalid JSON: {e}")))?;
    if !value.is_object() {
        return Err(OneBotError::MalformedMessage(
            "frame is not a JSON object".into(),
        ));
    }
    Ok(value)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PostType {
    Message,
    Notice,
    Request,
    MetaEvent,
    Other(String),
}

impl PostType {
    pub fn parse(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "notice" => Self::Notice,
            "request" => Self::Request,
            "meta_event" => Self::MetaEvent,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::MetaEvent => "meta_event",
            Self::Other(s) => s,
        }
    }

    /// The discriminator field OneBot defines for this post type.
    fn detail_field(&self) -> Option<&'static str> {
        match self {
            Self::Message => Some("message_type"),
            Self::Notice => Some("notice_type"),
            Self::Request => Some("request_type"),
            Self::MetaEvent => Some("meta_event_type"),
            Self::Other(_) => None,
        }
    }
}

/// An event pushed by the peer. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    post_type: PostType,
    detail_type: String,
    raw: Value,
}

impl Event {
    /// Build an event from a decoded frame. The frame must be an object with a
    /// string `post_type`.
    pub fn from_value(raw: Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| OneBotError::MalformedMessage("event is not a JSON object".into()))?;
        let post_type = obj
            .get("post_type")
            .and_then(Value::as_str)
            .map(PostType::parse)
            .ok_or_else(|| OneBotError::MalformedMessage("event has no post_type".into()))?;

        let own_field = post_type.detail_field().into_iter();
        let detail_type = own_field
            .chain(DETAIL_FIELDS)
            .find_map(|field| obj.get(field).and_then(Value::as_str))
            .unwrap_or_default()
            .to_owned();

        Ok(Self {
            post_type,
            detail_type,
            raw,
        })
    }

    pub fn post_type(&self) -> &PostType {
        &self.post_type
    }

    pub fn detail_type(&self) -> &str {
        &self.detail_type
    }

    /// Routing key, `"<post_type>.<detail_type>"`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.post_type.as_str(), self.detail_type)
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.raw.get("sub_type").and_then(Value::as_str)
    }

    /// Account id of the bot that produced the event.
    pub fn self_id(&self) -> Option<i64> {
        self.raw.get("self_id").and_then(Value::as_i64)
    }

    /// Unix timestamp (seconds) at which the peer produced the event.
    pub fn time(&self) -> Option<i64> {
        self.raw.get("time").and_then(Value::as_i64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.raw.get(field)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Decode the full payload into a typed event.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.raw)?)
    }
}

/// Typed view of a `message` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEvent {
    pub time: i64,
    pub self_id: i64,
    pub message_type: String,
    #[serde(default)]
    pub sub_type: String,
    pub message_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    pub message: Value,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub sender: Sender,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}
