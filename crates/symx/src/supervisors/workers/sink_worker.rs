//! 🎬 *[a queue fills with replies. somewhere, a sink waits.]*
//!
//! 🗑️ The SinkWorker: patient, tireless, and deeply unbothered by the chaos
//! upstream. It takes one message at a time, works out which stream it belongs
//! to, wraps it, and posts it.
//!
//! 🧠 Knowledge graph:
//! - Drains until the queue is closed AND empty. Closing is the stop signal.
//! - Where does a message go?
//!   1. its own `stream_id`, if it has one;
//!   2. `room == "IM"`: the cached DM for `author_id`, or a freshly created one
//!      (then cached); no `author_id`, then the cached DM for the display name;
//!   3. anything else: the room directory, network fallback included.
//! - One send = one `send_timeout`. Blow it and that message failed.
//! - A failed message never stops the worker. It gets logged, optionally
//!   apologised for to the recipient, optionally reported to the error room.
//!
//! 🦆 (the duck has no comment at this time)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Worker;
use crate::backends::{Sink, SinkBackend};
use crate::directory::RoomDirectory;
use crate::markup::{escape_message_ml, wrap_message_ml};
use crate::message::ChatMessage;

/// What the recipient sees when `inform_client` is on and their message didn't make it.
const FAILURE_NOTICE: &str = "⚠️ A message for you could not be delivered. The bot operators have been told.";

/// 🚨 What to do, besides logging, when a message can't be sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FailurePolicy {
    /// Room name (or stream id) that gets the full error text.
    pub(crate) error_room: Option<String>,
    /// Tell the intended recipient with a generic notice.
    pub(crate) inform_client: bool,
}

#[derive(Debug)]
pub(crate) struct SinkWorker {
    rx: Receiver<ChatMessage>,
    sink: Arc<SinkBackend>,
    directory: Arc<RoomDirectory>,
    failure: FailurePolicy,
    send_timeout: Duration,
}

impl SinkWorker {
    pub(crate) fn new(
        rx: Receiver<ChatMessage>,
        sink: Arc<SinkBackend>,
        directory: Arc<RoomDirectory>,
        failure: FailurePolicy,
        send_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            sink,
            directory,
            failure,
            send_timeout,
        }
    }

    /// 🧭 Work out the target stream. `Ok(None)` = nowhere to send it.
    async fn resolve_stream(&self, message: &ChatMessage) -> Result<Option<String>> {
        if let Some(stream_id) = message.stream_id.as_deref().filter(|s| !s.is_empty()) {
            return Ok(Some(stream_id.to_string()));
        }

        if !message.is_direct_message() {
            return Ok(self.directory.get_id_async(&message.room).await);
        }

        if message.author_id.is_empty() {
            return Ok(self.directory.get_id(&message.author_display_name));
        }
        if let Some(stream_id) = self.directory.get_id(&message.author_id) {
            return Ok(Some(stream_id));
        }
        let stream_id = self.sink.create_im(&message.author_id).await?;
        self.directory.register_dm(&message.author_id, &stream_id);
        Ok(Some(stream_id))
    }

    async fn send_bounded(&self, stream_id: &str, body: &str) -> Result<()> {
        let message_ml = wrap_message_ml(body);
        tokio::time::timeout(self.send_timeout, self.sink.send_message(stream_id, &message_ml))
            .await
            .map_err(|_| anyhow!("💀 send to '{}' timed out after {:?}", stream_id, self.send_timeout))?
    }

    /// 📤 Resolve, then send. Returns the stream it tried, for failure reporting.
    async fn deliver(&self, message: &ChatMessage) -> (Option<String>, Result<()>) {
        let stream_id = match self.resolve_stream(message).await {
            Ok(Some(stream_id)) => stream_id,
            Ok(None) => {
                let target = if !message.is_direct_message() {
                    format!("room '{}'", message.room)
                } else if message.author_id.is_empty() {
                    format!("DM recipient '{}'", message.author_display_name)
                } else {
                    format!("DM recipient '{}'", message.author_id)
                };
                return (None, Err(anyhow!("💀 cannot find a stream for {}", target)));
            }
            Err(err) => return (None, Err(err.context("💀 could not open a DM stream"))),
        };
        let outcome = self.send_bounded(&stream_id, &message.body).await;
        (Some(stream_id), outcome)
    }

    async fn report_failure(&self, message: &ChatMessage, stream_id: Option<&str>, err: &anyhow::Error) {
        if let Some(stream_id) = stream_id.filter(|_| self.failure.inform_client) {
            if let Err(notice_err) = self.send_bounded(stream_id, FAILURE_NOTICE).await {
                warn!("⚠️ could not tell '{}' about the failure either: {:#}", stream_id, notice_err);
            }
        }

        let Some(error_room) = self.failure.error_room.as_deref() else {
            return;
        };
        let Some(error_stream) = self.directory.get_id_async(error_room).await else {
            warn!("⚠️ error room '{}' could not be found", error_room);
            return;
        };
        let detail = escape_message_ml(&format!(
            "Failed to send a message to {} (room '{}'): {:#}",
            stream_id.unwrap_or("an unresolved stream"),
            message.room,
            err
        ));
        if let Err(report_err) = self.send_bounded(&error_stream, &detail).await {
            warn!("⚠️ could not report the failure to '{}': {:#}", error_room, report_err);
        }
    }
}

impl Worker for SinkWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 SinkWorker started draining the outbound queue");
            while let Ok(message) = self.rx.recv().await {
                let (stream_id, outcome) = self.deliver(&message).await;
                if let Err(err) = outcome {
                    error!("💀 outbound message to room '{}' failed: {:#}", message.room, err);
                    self.report_failure(&message, stream_id.as_deref(), &err).await;
                }
            }
            debug!("🏁 SinkWorker: queue closed and drained. Shutting down.");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryRooms, InMemorySink, RoomSummary};

    struct Rig {
        tx: async_channel::Sender<ChatMessage>,
        handle: JoinHandle<Result<()>>,
        sink: InMemorySink,
        directory: Arc<RoomDirectory>,
    }

    impl Rig {
        fn new(rooms: InMemoryRooms, failure: FailurePolicy) -> Self {
            let sink = InMemorySink::new();
            let directory = Arc::new(RoomDirectory::new(Arc::new(rooms)));
            let (tx, rx) = async_channel::unbounded();
            let handle = SinkWorker::new(
                rx,
                Arc::new(SinkBackend::InMemory(sink.clone())),
                directory.clone(),
                failure,
                Duration::from_secs(5),
            )
            .start();
            Self {
                tx,
                handle,
                sink,
                directory,
            }
        }

        async fn finish(self) -> Result<InMemorySink> {
            self.tx.close();
            self.handle.await??;
            Ok(self.sink)
        }
    }

    fn ops_rooms() -> InMemoryRooms {
        InMemoryRooms::with_rooms(vec![
            RoomSummary::new("Ops", "ops-id"),
            RoomSummary::new("Bot Errors", "errors-id"),
        ])
    }

    #[tokio::test]
    async fn the_one_where_room_names_are_resolved_and_bodies_wrapped_once() -> Result<()> {
        let rig = Rig::new(ops_rooms(), FailurePolicy::default());
        rig.tx.send(ChatMessage::to_room("Ops", "hello")).await?;
        rig.tx.send(ChatMessage::to_room("Ops", "<messageML>already</messageML>")).await?;

        let sent = rig.finish().await?.sent();
        assert_eq!(
            sent,
            vec![
                ("ops-id".to_string(), "<messageML>hello</messageML>".to_string()),
                ("ops-id".to_string(), "<messageML>already</messageML>".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_explicit_stream_wins() -> Result<()> {
        let rig = Rig::new(ops_rooms(), FailurePolicy::default());
        let inbound = ChatMessage {
            room: "Ops".into(),
            stream_id: Some("somewhere-else".into()),
            ..Default::default()
        };
        rig.tx.send(inbound.reply("ack")).await?;

        let sent = rig.finish().await?.sent();
        assert_eq!(sent[0].0, "somewhere-else");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_dm_stream_is_created_once_and_reused() -> Result<()> {
        let rig = Rig::new(InMemoryRooms::default(), FailurePolicy::default());
        rig.tx.send(ChatMessage::to_user("42", "one")).await?;
        rig.tx.send(ChatMessage::to_user("42", "two")).await?;
        let directory = rig.directory.clone();

        let record = rig.finish().await?.record();
        assert_eq!(record.ims_created, vec!["42"]);
        assert_eq!(record.sent[0].0, "im-42");
        assert_eq!(record.sent[1].0, "im-42");
        assert_eq!(directory.get_id("42").as_deref(), Some("im-42"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_known_dm_needs_no_new_stream() -> Result<()> {
        let rig = Rig::new(InMemoryRooms::default(), FailurePolicy::default());
        rig.directory.register_dm("Alice", "s1");
        rig.directory.register_dm("42", "s1");
        rig.tx.send(ChatMessage::to_user("42", "by id")).await?;
        rig.tx
            .send(ChatMessage {
                author_display_name: "Alice".into(),
                room: "IM".into(),
                body: "by name".into(),
                ..Default::default()
            })
            .await?;

        let record = rig.finish().await?.record();
        assert!(record.ims_created.is_empty());
        assert_eq!(record.sent.len(), 2);
        assert!(record.sent.iter().all(|(stream, _)| stream == "s1"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_failures_are_reported_and_the_worker_carries_on() -> Result<()> {
        let rig = Rig::new(
            ops_rooms(),
            FailurePolicy {
                error_room: Some("Bot Errors".into()),
                inform_client: false,
            },
        );
        rig.tx.send(ChatMessage::to_room("Nowhere", "lost")).await?;
        rig.tx.send(ChatMessage::to_room("Ops", "still working")).await?;

        let sent = rig.finish().await?.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "errors-id");
        assert!(sent[0].1.contains("cannot find a stream for room 'Nowhere'"));
        assert_eq!(sent[1], ("ops-id".to_string(), "<messageML>still working</messageML>".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_recipient_hears_about_it() -> Result<()> {
        let rig = Rig::new(
            ops_rooms(),
            FailurePolicy {
                error_room: None,
                inform_client: true,
            },
        );
        // 💥 the real body is rejected, the short notice is not
        rig.sink.fail_sends_containing("the real answer");
        rig.tx
            .send(ChatMessage {
                room: "Ops".into(),
                stream_id: Some("unlucky".into()),
                body: "the real answer".into(),
                ..Default::default()
            })
            .await?;

        let sent = rig.finish().await?.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "unlucky");
        assert_eq!(sent[0].1, wrap_message_ml(FAILURE_NOTICE));
        Ok(())
    }
}
