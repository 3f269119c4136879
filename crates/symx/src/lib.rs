//! 💬 symx: connects a chat platform's datafeed to a dataflow host.
//!
//! Inbound, feed events become [`ChatMessage`] batches on a channel. Outbound,
//! the host hands [`ChatMessage`]s to a [`Publisher`] and the adapter works out
//! where they go. Everything in between is somebody else's module. 🦆

pub mod app_config;
pub mod backends;
pub mod directory;
pub mod events;
pub mod markup;
pub mod message;
pub mod retry;
pub mod supervisors;
pub mod translator;

pub use app_config::{AppConfig, RuntimeConfig, load_config};
pub use backends::Presence;
pub use message::{ChatMessage, DIRECT_MESSAGE_ROOM};
pub use supervisors::{Publisher, SubscribeOptions, Supervisor as Adapter};
