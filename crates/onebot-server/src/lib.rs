//! # onebot-server
//!
//! Reverse WebSocket transport for OneBot v11. The bot client connects to
//! us; we receive its events and issue calls correlated by `echo`.
//!
//! ```no_run
//! use onebot_server::{Bot, EventKey, ServerConfig};
//!
//! # async fn run() -> onebot_core::Result<()> {
//! let bot = Bot::new(ServerConfig::default());
//! bot.on("message.group", |event: &onebot_core::Event| {
//!     tracing::info!(key = %event.key(), "group message");
//!     Ok(())
//! });
//! bot.on(EventKey::Any, |_event: &onebot_core::Event| Ok(()));
//! bot.init().await?;
//! let me = bot.get_login_info().await;
//! # let _ = me;
//! bot.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bot;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod session;

pub use api::{
    FriendInfo, GroupInfo, GroupMemberInfo, LoginInfo, MessageId, MessageRecord, MessageSender,
    MessageTarget, Status, StrangerInfo, VersionInfo,
};
pub use bot::Bot;
pub use config::ServerConfig;
pub use connection::{ConnectionEvent, ConnectionManager, PeerInfo};
pub use dispatcher::{listener, EventKey, EventListener, Listener, ListenerRegistry, ListenerResult};
