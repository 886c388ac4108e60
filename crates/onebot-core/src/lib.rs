//! # onebot-core
//!
//! Shared vocabulary for the OneBot v11 reverse-WebSocket binding:
//!
//! - **Events**: [`Event`] with its [`PostType`] and classification key (`"message.group"`)
//! - **Calls**: [`CallRequest`] sent to the peer and the [`CallResponse`] echoed back
//! - **IDs**: [`PeerId`] for connections, [`Echo`] correlation tokens from an [`EchoGenerator`]
//! - **Errors**: [`OneBotError`] hierarchy via `thiserror`

pub mod action;
pub mod errors;
pub mod event;
pub mod ids;

pub use action::{CallRequest, CallResponse, DEFAULT_FAILURE_MESSAGE};
pub use errors::{OneBotError, Result};
pub use event::{parse_frame, Event, MessageEvent, PostType, Sender};
pub use ids::{Echo, EchoGenerator, PeerId};
