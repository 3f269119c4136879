//! 🔀 The translator: one feed event in, zero or one [`ChatMessage`] out.
//!
//! Pure mapping, no I/O, never awaits. The only side effect is teaching the
//! [`RoomDirectory`] about DM streams it just discovered.
//!
//! 🧠 Knowledge graph:
//! - Allow-set of stream ids: empty means "every room". Non-empty means "only these".
//! - ROOM streams get their cached name, or the raw stream id if the cache shrugs.
//!   A message is never dropped just because we don't know what the room is called.
//! - IM streams register both author spellings (display name, user id) and become `"IM"`.
//! - Anything else keeps the raw stream id as its room and registers nothing.
//! - `own_user_id`: when set, the bot's own messages are dropped, so it doesn't
//!   reply to itself forever. Ask us how we know.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::directory::RoomDirectory;
use crate::events::{FeedAuthor, FeedEvent, FeedStream, StreamType, USER_ERROR, extract_mentions};
use crate::message::{ChatMessage, DIRECT_MESSAGE_ROOM};

#[derive(Debug)]
pub struct FeedTranslator {
    allowed: HashSet<String>,
    own_user_id: Option<String>,
    directory: Arc<RoomDirectory>,
}

impl FeedTranslator {
    pub fn new(allowed: HashSet<String>, directory: Arc<RoomDirectory>) -> Self {
        Self {
            allowed,
            own_user_id: None,
            directory,
        }
    }

    /// 🙈 Ignore events authored by this user id (the bot itself).
    pub fn skipping_user(mut self, user_id: impl Into<String>) -> Self {
        self.own_user_id = Some(user_id.into());
        self
    }

    /// Is this stream inside the subscription scope?
    pub fn accepts(&self, stream_id: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(stream_id)
    }

    pub fn translate(&self, event: &FeedEvent) -> Option<ChatMessage> {
        let (stream, author) = match event {
            FeedEvent::MessageSent(sent) => (&sent.stream, &sent.author),
            FeedEvent::FormSubmitted(form) => (&form.stream, &form.author),
            FeedEvent::Other => return None,
        };

        if stream.stream_id.is_empty() || !self.accepts(&stream.stream_id) {
            trace!("🚫 stream '{}' is outside the subscription", stream.stream_id);
            return None;
        }
        if self.own_user_id.as_deref() == Some(author.user_id.as_str()) {
            trace!("🪞 skipping our own message in '{}'", stream.stream_id);
            return None;
        }

        let room = self.resolve_room(stream, author);
        let message = ChatMessage {
            author_display_name: author.display_name.clone(),
            author_email: author.email.clone(),
            author_id: author.user_id.clone(),
            room,
            stream_id: Some(stream.stream_id.clone()),
            ..Default::default()
        };

        Some(match event {
            FeedEvent::MessageSent(sent) => ChatMessage {
                mentioned_user_ids: extract_mentions(sent.mention_data.as_deref()),
                body: sent.body.clone(),
                ..message
            },
            FeedEvent::FormSubmitted(form) => ChatMessage {
                form_id: form.form_id.clone(),
                form_values: Some(form.form_values.clone()),
                ..message
            },
            FeedEvent::Other => return None,
        })
    }

    /// 📦 Translate a whole batch, dropping whatever doesn't make the cut. Order is kept.
    pub fn translate_batch(&self, events: &[FeedEvent]) -> Vec<ChatMessage> {
        events.iter().filter_map(|event| self.translate(event)).collect()
    }

    fn resolve_room(&self, stream: &FeedStream, author: &FeedAuthor) -> String {
        match &stream.stream_type {
            StreamType::Room => self
                .directory
                .get_name(&stream.stream_id)
                .unwrap_or_else(|| stream.stream_id.clone()),
            StreamType::Im => {
                // -- 🚫 a sentinel is not a person; nobody should be able to DM "USER_ERROR"
                for alias in [&author.display_name, &author.user_id] {
                    if !alias.is_empty() && alias != USER_ERROR {
                        self.directory.register_dm(alias, &stream.stream_id);
                    }
                }
                DIRECT_MESSAGE_ROOM.to_string()
            }
            StreamType::Other(_) => stream.stream_id.clone(),
        }
    }
}
