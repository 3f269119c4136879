//! 📦 The message model: one struct, both directions.
//!
//! 🎬 COLD OPEN: INT. CHAT ROOM. 9:02 AM.
//! Somebody typed "hello bot". Somebody else mentioned three coworkers and a
//! distribution list. A third person submitted a form with fourteen dropdowns.
//! All of it has to squeeze through the same pipe into a dataflow graph, and
//! whatever the graph says back has to squeeze out the other end.
//!
//! `ChatMessage` is that pipe's unit of cargo. Inbound, the translator builds one
//! per feed event. Outbound, the graph builds one per reply and the sink worker
//! figures out where it goes. 🦆
//!
//! ⚠️ Immutable after construction. Want a different body? Derive a new message
//! with [`ChatMessage::with_body`]. We don't mutate here. We have standards.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::markup;

/// 🏷️ The sentinel room for direct messages. Not a real room. Never was.
pub const DIRECT_MESSAGE_ROOM: &str = "IM";

/// 💬 One chat message, normalized away from whatever shape the platform sent.
///
/// Inbound messages always carry `stream_id`. Outbound messages may leave it
/// empty and let the sink worker resolve `room` (or the DM recipient) instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub author_display_name: String,
    pub author_email: String,
    /// 🎯 Author on the way in. Recipient on the way out when `room == "IM"`.
    pub author_id: String,
    /// User ids mentioned in the body, in the order they appeared.
    #[serde(default)]
    pub mentioned_user_ids: Vec<String>,
    /// Room name, `"IM"`, or a raw stream id when no friendly name was found.
    pub room: String,
    #[serde(default)]
    pub body: String,
    /// 📝 Non-empty only for form submissions. When set, `body` means nothing.
    #[serde(default)]
    pub form_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_values: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

impl ChatMessage {
    /// 📣 A fresh outbound message for a named room (or raw stream id).
    pub fn to_room(room: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    /// 🤫 A fresh outbound direct message for a user id.
    pub fn to_user(user_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author_id: user_id.into(),
            room: DIRECT_MESSAGE_ROOM.to_string(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn is_direct_message(&self) -> bool {
        self.room == DIRECT_MESSAGE_ROOM
    }

    pub fn is_form_submission(&self) -> bool {
        !self.form_id.is_empty()
    }

    /// Did this message mention `user_id`? Handy for "only answer when pinged" bots.
    pub fn mentions(&self, user_id: &str) -> bool {
        self.mentioned_user_ids.iter().any(|id| id == user_id)
    }

    /// 🔁 Answer in the same place the message came from.
    ///
    /// Same room, same stream. Author fields tag along so that a reply to a DM
    /// still knows who the recipient is, even if the stream id is lost later.
    pub fn reply(&self, body: impl Into<String>) -> Self {
        Self {
            author_display_name: self.author_display_name.clone(),
            author_email: self.author_email.clone(),
            author_id: self.author_id.clone(),
            mentioned_user_ids: Vec::new(),
            room: self.room.clone(),
            body: body.into(),
            form_id: String::new(),
            form_values: None,
            stream_id: self.stream_id.clone(),
        }
    }

    /// 🤫 Answer the author privately, wherever they wrote from.
    ///
    /// The stream id is cleared on purpose: a room's stream is not the author's DM
    /// stream, and the sink worker resolves (or creates) the right one.
    pub fn direct_reply(&self, body: impl Into<String>) -> Self {
        Self {
            room: DIRECT_MESSAGE_ROOM.to_string(),
            stream_id: None,
            ..self.reply(body)
        }
    }

    /// ✏️ Same message, new words.
    pub fn with_body(&self, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..self.clone()
        }
    }

    /// 🏷️ Markup that pings the author. Prefers the user id, falls back to email.
    pub fn mention_author(&self) -> String {
        if !self.author_id.is_empty() {
            markup::mention_by_id(&self.author_id)
        } else {
            markup::mention_user(&self.author_email)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn the_inbound_room_message() -> ChatMessage {
        ChatMessage {
            author_display_name: "Alice".into(),
            author_email: "alice@example.com".into(),
            author_id: "42".into(),
            mentioned_user_ids: vec!["7".into()],
            room: "Trading Floor".into(),
            body: "hello bot".into(),
            form_id: String::new(),
            form_values: None,
            stream_id: Some("stream-abc".into()),
        }
    }

    #[test]
    fn the_one_where_reply_stays_in_the_room() {
        let msg = the_inbound_room_message();
        let reply = msg.reply("hi Alice");

        assert_eq!(reply.room, "Trading Floor");
        assert_eq!(reply.stream_id.as_deref(), Some("stream-abc"));
        assert_eq!(reply.body, "hi Alice");
        assert!(reply.mentioned_user_ids.is_empty(), "replies don't inherit mentions");
        assert_eq!(msg.body, "hello bot", "the original is untouched");
    }

    #[test]
    fn the_one_where_direct_reply_slides_into_the_dms() {
        let msg = the_inbound_room_message();
        let dm = msg.direct_reply("psst");

        assert!(dm.is_direct_message());
        assert_eq!(dm.stream_id, None, "room stream must not leak into the DM");
        assert_eq!(dm.author_id, "42", "recipient is the original author");
    }

    #[test]
    fn the_one_where_with_body_only_swaps_the_words() {
        let msg = the_inbound_room_message();
        let rebodied = msg.with_body("new words");

        assert_eq!(rebodied.body, "new words");
        assert_eq!(rebodied.mentioned_user_ids, msg.mentioned_user_ids);
        assert_eq!(rebodied.stream_id, msg.stream_id);
    }

    #[test]
    fn the_one_where_constructors_fill_the_right_fields() {
        let to_room = ChatMessage::to_room("Ops", "deploying");
        assert_eq!(to_room.room, "Ops");
        assert!(!to_room.is_direct_message());

        let to_user = ChatMessage::to_user("99", "hey");
        assert!(to_user.is_direct_message());
        assert_eq!(to_user.author_id, "99");
    }

    #[test]
    fn the_one_where_mentions_and_forms_are_detected() {
        let msg = the_inbound_room_message();
        assert!(msg.mentions("7"));
        assert!(!msg.mentions("8"));
        assert!(!msg.is_form_submission());

        let form = ChatMessage {
            form_id: "approve".into(),
            ..Default::default()
        };
        assert!(form.is_form_submission());
    }

    #[test]
    fn the_one_where_mention_author_prefers_the_id() {
        let msg = the_inbound_room_message();
        assert_eq!(msg.mention_author(), r#"<mention uid="42" />"#);

        let no_id = ChatMessage {
            author_email: "bob@example.com".into(),
            ..Default::default()
        };
        assert_eq!(no_id.mention_author(), r#"<mention email="bob@example.com" />"#);
    }
}
