//! 📨 Feed events: decoding the platform's raw JSON once, at the door.
//!
//! The datafeed hands us a soup of `{"type": ..., "payload": {...}}` objects.
//! Two flavors matter. Everything else is politely ignored.
//!
//! 🧠 Knowledge graph:
//! - `MESSAGESENT` → [`FeedEvent::MessageSent`]: `payload.messageSent.message.{stream,user,message,data}`
//! - `SYMPHONYELEMENTSACTION` → [`FeedEvent::FormSubmitted`]: `payload.symphonyElementsAction.{stream,formId,formValues}`
//!   with the author hiding under `initiator.user`.
//! - Anything else → [`FeedEvent::Other`].
//! - Missing author fields become `USER_ERROR`, a missing body `MSG_ERROR`, a missing
//!   form id `FORM_ID_ERROR`. The message still flows, so somebody can see it was weird.
//! - A missing stream id is a decode failure. [`decode_batch`] skips that one event and moves on.
//!
//! 🦆 The duck decodes nothing. The duck is decoded.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Author placeholder when the event didn't say who did it.
pub const USER_ERROR: &str = "USER_ERROR";
/// Body placeholder when a message event arrived with no message.
pub const MSG_ERROR: &str = "MSG_ERROR";
/// Form id placeholder when a form submission forgot which form it was.
pub const FORM_ID_ERROR: &str = "FORM_ID_ERROR";

const USER_MENTION_TYPE: &str = "com.symphony.user.mention";

/// 🏷️ What kind of stream an event happened in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum StreamType {
    #[default]
    Room,
    Im,
    /// MIM, POST, whatever the platform invents next.
    Other(String),
}

impl From<String> for StreamType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "ROOM" => Self::Room,
            "IM" => Self::Im,
            _ => Self::Other(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStream {
    pub stream_id: String,
    #[serde(default)]
    pub stream_type: StreamType,
}

/// 👤 Who did it. Never empty: unknown fields carry [`USER_ERROR`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedAuthor {
    pub display_name: String,
    pub email: String,
    pub user_id: String,
}

impl Default for FeedAuthor {
    fn default() -> Self {
        Self {
            display_name: USER_ERROR.to_string(),
            email: USER_ERROR.to_string(),
            user_id: USER_ERROR.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    display_name: Option<String>,
    email: Option<String>,
    // -- 🔢 sometimes a number, sometimes a string, always an adventure
    user_id: Option<Value>,
}

impl From<RawUser> for FeedAuthor {
    fn from(raw: RawUser) -> Self {
        Self {
            display_name: raw.display_name.unwrap_or_else(|| USER_ERROR.to_string()),
            email: raw.email.unwrap_or_else(|| USER_ERROR.to_string()),
            user_id: raw
                .user_id
                .as_ref()
                .and_then(scalar_to_string)
                .unwrap_or_else(|| USER_ERROR.to_string()),
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 💬 Somebody typed something.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawMessageSentEvent")]
pub struct MessageSent {
    pub stream: FeedStream,
    pub author: FeedAuthor,
    pub body: String,
    /// The JSON-in-a-string entity blob that encodes mentions. See [`extract_mentions`].
    pub mention_data: Option<String>,
}

#[derive(Deserialize)]
struct RawMessageSentEvent {
    payload: RawMessageSentPayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageSentPayload {
    message_sent: RawMessageSentWrapper,
}

#[derive(Deserialize)]
struct RawMessageSentWrapper {
    message: RawMessage,
}

#[derive(Deserialize)]
struct RawMessage {
    stream: FeedStream,
    #[serde(default)]
    user: RawUser,
    message: Option<String>,
    data: Option<Value>,
}

impl From<RawMessageSentEvent> for MessageSent {
    fn from(raw: RawMessageSentEvent) -> Self {
        let message = raw.payload.message_sent.message;
        Self {
            stream: message.stream,
            author: message.user.into(),
            body: message.message.unwrap_or_else(|| MSG_ERROR.to_string()),
            mention_data: match message.data {
                Some(Value::String(blob)) => Some(blob),
                _ => None,
            },
        }
    }
}

/// 📝 Somebody clicked "submit" on an interactive form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawFormEvent")]
pub struct FormSubmitted {
    pub stream: FeedStream,
    pub author: FeedAuthor,
    pub form_id: String,
    pub form_values: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawFormEvent {
    #[serde(default)]
    initiator: RawInitiator,
    payload: RawFormPayload,
}

#[derive(Default, Deserialize)]
struct RawInitiator {
    #[serde(default)]
    user: RawUser,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFormPayload {
    symphony_elements_action: RawFormAction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFormAction {
    stream: FeedStream,
    form_id: Option<String>,
    #[serde(default)]
    form_values: Map<String, Value>,
}

impl From<RawFormEvent> for FormSubmitted {
    fn from(raw: RawFormEvent) -> Self {
        let action = raw.payload.symphony_elements_action;
        Self {
            stream: action.stream,
            author: raw.initiator.user.into(),
            form_id: action.form_id.unwrap_or_else(|| FORM_ID_ERROR.to_string()),
            form_values: action.form_values,
        }
    }
}

/// 🎭 One decoded datafeed event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum FeedEvent {
    #[serde(rename = "MESSAGESENT")]
    MessageSent(MessageSent),
    #[serde(rename = "SYMPHONYELEMENTSACTION")]
    FormSubmitted(FormSubmitted),
    /// Joins, leaves, reactions, and the rest of the platform's small talk.
    #[serde(other)]
    Other,
}

impl FeedEvent {
    pub fn stream(&self) -> Option<&FeedStream> {
        match self {
            Self::MessageSent(event) => Some(&event.stream),
            Self::FormSubmitted(event) => Some(&event.stream),
            Self::Other => None,
        }
    }

    pub fn author(&self) -> Option<&FeedAuthor> {
        match self {
            Self::MessageSent(event) => Some(&event.author),
            Self::FormSubmitted(event) => Some(&event.author),
            Self::Other => None,
        }
    }
}

/// 🏷️ Pull mentioned user ids out of the entity blob, in document order.
///
/// Garbage in, empty list out. Never errors, never panics. Entries that aren't
/// user mentions, or are user mentions with a weird shape, are skipped one by one.
pub fn extract_mentions(blob: Option<&str>) -> Vec<String> {
    let Some(blob) = blob.map(str::trim).filter(|b| !b.is_empty()) else {
        return Vec::new();
    };
    let parsed: Value = match serde_json::from_str(blob) {
        Ok(value) => value,
        Err(err) => {
            debug!("🤷 mention blob is not JSON, ignoring it: {}", err);
            return Vec::new();
        }
    };

    let entries: Vec<&Value> = match &parsed {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some(USER_MENTION_TYPE))
        .filter_map(|entry| entry.get("id")?.get(0)?.get("value"))
        .filter_map(scalar_to_string)
        .collect()
}

/// 📦 Decode a raw batch. One bad event never spoils the batch: it's logged and skipped.
pub fn decode_batch(raw_events: Vec<Value>) -> Vec<FeedEvent> {
    raw_events
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<FeedEvent>(raw) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!("🗑️ skipping undecodable feed event: {}", err);
                None
            }
        })
        .collect()
}
