//! # Previously, on symx...
//!
//! 🎬 The chat platform was down. Or far away. Or behind three VPNs and a
//! certificate nobody could find. Someone still had to test the pipeline.
//! Someone had to pretend to be the platform, entirely in RAM, gone the
//! moment the test ends.
//!
//! That someone was this module.
//!
//! - [`InMemorySource`] replays scripted feed batches, then ends, hangs, or dies on cue.
//! - [`InMemorySink`] writes down everything you ask it to send behind an
//!   `Arc<Mutex<...>>`, so tests can read the evidence after the worker is gone.
//! - [`InMemoryRooms`] answers room lookups from a fixed list and counts every call.
//!
//! 🦆
//!
//! ⚠️ Not for production. No network calls. No disk I/O. Just vibes and heap memory.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

use crate::backends::{Presence, RoomLookup, RoomSummary, Sink, Source};

/// What the source does once its script runs out.
#[derive(Debug, Clone, PartialEq)]
enum Ending {
    /// `Ok(None)`: the feed is over.
    Finish,
    /// Never returns again, like a real long-poll on a quiet day.
    Hang,
    /// `Err(..)`: the feed died. Fatal, as far as the worker is concerned.
    Fail(String),
}

/// 📦 A feed with a script.
#[derive(Debug)]
pub struct InMemorySource {
    batches: VecDeque<Vec<Value>>,
    ending: Ending,
    closed: Arc<AtomicBool>,
}

impl InMemorySource {
    /// Replays `batches`, then reports the end of the feed.
    pub fn new(batches: Vec<Vec<Value>>) -> Self {
        Self::scripted(batches, Ending::Finish)
    }

    /// Replays `batches`, then waits forever. For exercising shutdown.
    pub fn endless(batches: Vec<Vec<Value>>) -> Self {
        Self::scripted(batches, Ending::Hang)
    }

    /// Replays `batches`, then fails with `reason`. For exercising fatal feed errors.
    pub fn failing_after(batches: Vec<Vec<Value>>, reason: impl Into<String>) -> Self {
        Self::scripted(batches, Ending::Fail(reason.into()))
    }

    fn scripted(batches: Vec<Vec<Value>>, ending: Ending) -> Self {
        Self {
            batches: batches.into(),
            ending,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 🔍 A handle that flips to `true` once `close` has run. Grab it before handing the source off.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Value>>> {
        if let Some(batch) = self.batches.pop_front() {
            return Ok(Some(batch));
        }
        match &self.ending {
            Ending::Finish => Ok(None),
            Ending::Hang => std::future::pending().await,
            Ending::Fail(reason) => bail!("in-memory feed failed: {}", reason),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 🧾 Everything an [`InMemorySink`] was asked to do, in order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SinkRecord {
    /// `(stream_id, message_ml)` pairs that were delivered.
    pub sent: Vec<(String, String)>,
    /// User ids we opened DM streams for.
    pub ims_created: Vec<String>,
    pub presence: Vec<Presence>,
}

#[derive(Debug, Default)]
struct SinkScript {
    failing_streams: HashSet<String>,
    failing_needles: Vec<String>,
    presence_delay: Option<Duration>,
    fail_presence: bool,
}

/// 📦 A sink that never forgets.
///
/// Clone-able because tests need to peek inside after handing a copy to the
/// pipeline. The `Arc` means every clone shares the same record.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    record: Arc<Mutex<SinkRecord>>,
    script: Arc<Mutex<SinkScript>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 💥 Every send to `stream_id` fails from now on.
    pub fn fail_sends_to(&self, stream_id: impl Into<String>) {
        lock(&self.script).failing_streams.insert(stream_id.into());
    }

    /// 💥 Every send whose markup contains `needle` fails from now on.
    pub fn fail_sends_containing(&self, needle: impl Into<String>) {
        lock(&self.script).failing_needles.push(needle.into());
    }

    /// 🐌 Presence updates take this long. Pair with a short timeout.
    pub fn delay_presence(&self, delay: Duration) {
        lock(&self.script).presence_delay = Some(delay);
    }

    pub fn fail_presence(&self) {
        lock(&self.script).fail_presence = true;
    }

    /// 📸 A snapshot of everything recorded so far.
    pub fn record(&self) -> SinkRecord {
        lock(&self.record).clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.record).sent.clone()
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send_message(&self, stream_id: &str, message_ml: &str) -> Result<()> {
        let doomed = {
            let script = lock(&self.script);
            script.failing_streams.contains(stream_id)
                || script.failing_needles.iter().any(|needle| message_ml.contains(needle.as_str()))
        };
        if doomed {
            bail!("in-memory send to '{}' failed on purpose", stream_id);
        }
        lock(&self.record)
            .sent
            .push((stream_id.to_string(), message_ml.to_string()));
        Ok(())
    }

    async fn create_im(&self, user_id: &str) -> Result<String> {
        lock(&self.record).ims_created.push(user_id.to_string());
        Ok(format!("im-{user_id}"))
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        let (delay, fail) = {
            let script = lock(&self.script);
            (script.presence_delay, script.fail_presence)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(anyhow!("in-memory presence update failed on purpose"));
        }
        lock(&self.record).presence.push(presence);
        Ok(())
    }
}

/// 🔍 Room lookups over a fixed list. Counts calls so tests can prove the cache works.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRooms {
    rooms: Arc<Vec<RoomSummary>>,
    members: Arc<HashMap<String, Vec<String>>>,
    calls: Arc<AtomicUsize>,
    failing: bool,
}

impl InMemoryRooms {
    pub fn with_rooms(rooms: Vec<RoomSummary>) -> Self {
        Self {
            rooms: Arc::new(rooms),
            ..Default::default()
        }
    }

    /// Every lookup errors. The directory should shrug and call it a miss.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn with_members(mut self, stream_id: impl Into<String>, members: Vec<String>) -> Self {
        Arc::make_mut(&mut self.members).insert(stream_id.into(), members);
        self
    }

    /// How many lookups reached us, across every clone.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            bail!("in-memory room lookup failed on purpose");
        }
        Ok(())
    }
}

#[async_trait]
impl RoomLookup for InMemoryRooms {
    async fn search_rooms(&self, query: &str) -> Result<Vec<RoomSummary>> {
        self.touch()?;
        // -- 🎯 fuzzy like the real search endpoint; exact matching is the directory's job
        Ok(self.rooms.iter().filter(|room| room.name.contains(query)).cloned().collect())
    }

    async fn room_info(&self, stream_id: &str) -> Result<Option<RoomSummary>> {
        self.touch()?;
        Ok(self.rooms.iter().find(|room| room.id == stream_id).cloned())
    }

    async fn room_member_ids(&self, stream_id: &str) -> Result<Vec<String>> {
        self.touch()?;
        Ok(self.members.get(stream_id).cloned().unwrap_or_default())
    }
}
