//! 🖍️ Markup helpers for the platform's XML-ish message format (messageML).
//!
//! The platform only accepts bodies wrapped in `<messageML>` exactly once.
//! Twice is a 400. Zero times is also a 400. Once is the magic number.

/// Reversible replacement table. `&` goes first so we never escape our own escapes.
const ESCAPES: [(&str, &str); 4] = [
    ("&", "&#38;"),
    ("<", "&lt;"),
    ("${", "&#36;{"),
    ("#{", "&#35;{"),
];

const OPEN_TAG: &str = "<messageML>";
const CLOSE_TAG: &str = "</messageML>";

/// 🎁 Wrap a body in the messageML envelope, unless it's already wearing one.
pub fn wrap_message_ml(body: &str) -> String {
    let trimmed = body.trim();
    if is_wrapped(trimmed) {
        return trimmed.to_string();
    }
    format!("{OPEN_TAG}{body}{CLOSE_TAG}")
}

fn is_wrapped(trimmed: &str) -> bool {
    trimmed.starts_with(OPEN_TAG) && trimmed.ends_with(CLOSE_TAG)
}

/// 🧼 Make plain text safe to drop inside messageML.
pub fn escape_message_ml(text: &str) -> String {
    ESCAPES
        .iter()
        .fold(text.to_string(), |acc, (plain, escaped)| acc.replace(plain, escaped))
}

/// 🔄 Undo [`escape_message_ml`].
pub fn unescape_message_ml(text: &str) -> String {
    ESCAPES
        .iter()
        .fold(text.to_string(), |acc, (plain, escaped)| acc.replace(escaped, plain))
}

/// 🏷️ Mention someone by email (if it looks like one) or by user id.
///
/// Empty input gives an empty string, so callers can splice the result into a
/// body without checking first.
pub fn mention_user(email_or_user_id: &str) -> String {
    if email_or_user_id.is_empty() {
        String::new()
    } else if email_or_user_id.contains('@') {
        mention_by_email(email_or_user_id)
    } else {
        mention_by_id(email_or_user_id)
    }
}

pub fn mention_by_email(email: &str) -> String {
    format!(r#"<mention email="{email}" />"#)
}

pub fn mention_by_id(user_id: &str) -> String {
    format!(r#"<mention uid="{user_id}" />"#)
}

/// Space-joined mentions, skipping blanks.
pub fn mention_users<I, S>(users: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    users
        .into_iter()
        .map(|u| mention_user(u.as_ref()))
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
