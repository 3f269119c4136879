//! 🎬 *[a long-poll returns. forty events tumble out. nine of them matter.]*
//!
//! 🚰 The SourceWorker: pulls raw batches from the feed, decodes them, lets the
//! translator pick out the chat traffic, and hands the survivors to the host.
//!
//! 🧠 Knowledge graph:
//! - Stop signal vs `next_batch` in a `select!`. Stop wins ties, then the feed is closed.
//! - Unknown ROOM stream names are looked up here, *before* translation, so the
//!   translator itself never awaits anything.
//! - Empty batches never reach the host.
//! - `Err` from the feed ends the task with that error: the one fatal path.
//! - Host dropped the receiver? Nobody's listening. Close up and go home quietly.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Worker;
use crate::backends::{Source, SourceBackend};
use crate::directory::RoomDirectory;
use crate::events::{FeedEvent, StreamType, decode_batch};
use crate::message::ChatMessage;
use crate::translator::FeedTranslator;

#[derive(Debug)]
pub(crate) struct SourceWorker {
    source: SourceBackend,
    translator: FeedTranslator,
    directory: Arc<RoomDirectory>,
    tx: Sender<Vec<ChatMessage>>,
    stop: watch::Receiver<bool>,
}

impl SourceWorker {
    pub(crate) fn new(
        source: SourceBackend,
        translator: FeedTranslator,
        directory: Arc<RoomDirectory>,
        tx: Sender<Vec<ChatMessage>>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            translator,
            directory,
            tx,
            stop,
        }
    }

    /// 🔥 Make sure the directory knows every ROOM name this batch will ask for.
    async fn warm_room_names(&self, events: &[FeedEvent]) {
        for stream in events.iter().filter_map(FeedEvent::stream) {
            if stream.stream_type == StreamType::Room
                && self.translator.accepts(&stream.stream_id)
                && self.directory.get_name(&stream.stream_id).is_none()
            {
                // -- 🤷 a miss is fine; the translator falls back to the raw stream id
                let _ = self.directory.get_name_async(&stream.stream_id).await;
            }
        }
    }

    /// One polling cycle. `Ok(false)` means stop.
    async fn pump(&mut self) -> Result<bool> {
        let batch = tokio::select! {
            biased;
            _ = self.stop.changed() => return Ok(false),
            batch = self.source.next_batch() => batch.context("💀 the datafeed died")?,
        };

        let Some(raw_events) = batch else {
            info!("🏁 feed ended");
            return Ok(false);
        };

        let events = decode_batch(raw_events);
        self.warm_room_names(&events).await;
        let messages = self.translator.translate_batch(&events);
        if messages.is_empty() {
            return Ok(true);
        }

        debug!("📨 delivering {} messages to the host", messages.len());
        tokio::select! {
            biased;
            _ = self.stop.changed() => Ok(false),
            sent = self.tx.send(messages) => match sent {
                Ok(()) => Ok(true),
                Err(_) => {
                    warn!("📪 inbound receiver is gone, nobody is listening anymore");
                    Ok(false)
                }
            },
        }
    }
}

impl Worker for SourceWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🚰 SourceWorker started polling");
            let outcome = loop {
                if *self.stop.borrow() {
                    break Ok(());
                }
                match self.pump().await {
                    Ok(true) => continue,
                    Ok(false) => break Ok(()),
                    Err(err) => {
                        error!("💀 SourceWorker stopping on a fatal feed error: {:#}", err);
                        break Err(err);
                    }
                }
            };

            self.tx.close();
            if let Err(err) = self.source.close().await {
                warn!("⚠️ could not close the feed cleanly: {:#}", err);
            }
            debug!("🏁 SourceWorker done");
            outcome
        })
    }
}
