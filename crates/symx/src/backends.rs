//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Sources pour raw feed events in, Sinks push messages back out, and
//! RoomLookups answer "what's this room called?" when the cache shrugs.
//! And in between, we panic! (kidding, we use anyhow)
//!
//! 🎭 This module is the casting agency. Need to talk to the real chat platform?
//! There's a REST backend for that. Need a feed that never touches the network,
//! for tests or a rainy afternoon? There's an in-memory backend for that too.
//! The supervisor never knows which one it got. That's the point.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::fmt::Debug;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod common_config;
pub mod in_mem;
pub mod symphony;

pub use common_config::{RetryConfig, TlsConfig};
pub use in_mem::{InMemoryRooms, InMemorySink, InMemorySource};
pub use symphony::{DatafeedSource, SymphonyClient};

/// 🏠 A room, as far as lookups are concerned: what humans call it, what servers call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub name: String,
    pub id: String,
}

impl RoomSummary {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// 🟢 Presence categories the platform understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Presence {
    Available,
    Busy,
    Away,
    OnThePhone,
    BeRightBack,
    InAMeeting,
    OutOfOffice,
    Offline,
}

impl Presence {
    /// The wire spelling, e.g. `BE_RIGHT_BACK`.
    pub fn as_category(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Busy => "BUSY",
            Self::Away => "AWAY",
            Self::OnThePhone => "ON_THE_PHONE",
            Self::BeRightBack => "BE_RIGHT_BACK",
            Self::InAMeeting => "IN_A_MEETING",
            Self::OutOfOffice => "OUT_OF_OFFICE",
            Self::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_category())
    }
}

// ===== Source Trait and Backend Enum =====

/// 🚰 A source of raw feed events.
///
/// # Contract 📜
/// - `next_batch` returns `Ok(Some(events))` per polling cycle. The batch may be empty.
/// - `Ok(None)` means the feed has ended for good. Only finite feeds do this.
/// - `Err(...)` means the feed is dead (auth rejected, transport gave up). Fatal.
///   Transient trouble is the source's own business to retry.
/// - `close` releases server-side resources. Call it. Always.
#[async_trait]
pub trait Source: Debug + Send {
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a Source. Enum dispatch, so the worker stays generic-free.
#[derive(Debug)]
pub enum SourceBackend {
    Datafeed(DatafeedSource),
    InMemory(InMemorySource),
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>> {
        match self {
            SourceBackend::Datafeed(feed) => feed.next_batch().await,
            SourceBackend::InMemory(feed) => feed.next_batch().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SourceBackend::Datafeed(feed) => feed.close().await,
            SourceBackend::InMemory(feed) => feed.close().await,
        }
    }
}

// ===== Sink Trait and Backend Enum =====

/// 🕳️ Everything the bot pushes outward: messages, DM streams, presence.
///
/// Pure I/O. The sink worker decides *where* a message goes and wraps the
/// markup; the sink just delivers what it's handed.
#[async_trait]
pub trait Sink: Debug + Send + Sync {
    /// 📡 Post an already-wrapped messageML body to a stream.
    async fn send_message(&self, stream_id: &str, message_ml: &str) -> Result<()>;
    /// 🤝 Open (or reopen) a direct-message stream with a user. Returns the stream id.
    async fn create_im(&self, user_id: &str) -> Result<String>;
    async fn set_presence(&self, presence: Presence) -> Result<()>;
}

/// 🎭 Mirrors `SourceBackend` on the other end of the pipe.
#[derive(Debug)]
pub enum SinkBackend {
    Symphony(SymphonyClient),
    InMemory(InMemorySink),
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send_message(&self, stream_id: &str, message_ml: &str) -> Result<()> {
        match self {
            SinkBackend::Symphony(sink) => sink.send_message(stream_id, message_ml).await,
            SinkBackend::InMemory(sink) => sink.send_message(stream_id, message_ml).await,
        }
    }

    async fn create_im(&self, user_id: &str) -> Result<String> {
        match self {
            SinkBackend::Symphony(sink) => sink.create_im(user_id).await,
            SinkBackend::InMemory(sink) => sink.create_im(user_id).await,
        }
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        match self {
            SinkBackend::Symphony(sink) => sink.set_presence(presence).await,
            SinkBackend::InMemory(sink) => sink.set_presence(presence).await,
        }
    }
}

// ===== Room lookups =====

/// 🔍 The slow path behind the room directory's cache.
///
/// Search is allowed to be fuzzy; the directory does the exact-name filtering.
#[async_trait]
pub trait RoomLookup: Debug + Send + Sync {
    async fn search_rooms(&self, query: &str) -> Result<Vec<RoomSummary>>;
    /// `Ok(None)` when the platform says the room doesn't exist.
    async fn room_info(&self, stream_id: &str) -> Result<Option<RoomSummary>>;
    async fn room_member_ids(&self, stream_id: &str) -> Result<Vec<String>>;
}
