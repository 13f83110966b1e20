//! Turning raw RFC 5322 bytes into message descriptors.

use chrono::{DateTime, Utc};
use log::debug;
use mail_parser::{Address, HeaderValue, MessageParser};

use crate::models::NewInboxRecord;

use super::error::{EmailError, Result};
use super::FetchedMessage;

/// A parsed candidate message. Carries no storage identity yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub uid: u32,
    /// Message-ID header, or `uid:<uidvalidity>:<uid>` when the header is missing.
    pub message_id: String,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub raw_body: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Builds the insertion candidate for `user_id`.
    pub fn into_candidate(self, user_id: &str) -> NewInboxRecord {
        NewInboxRecord {
            user_id: user_id.to_string(),
            message_id: self.message_id,
            thread_id: self.thread_id,
            subject: self.subject,
            from_address: self.from_address,
            to_address: self.to_address,
            raw_body: Some(self.raw_body),
            text_body: self.text_body,
            html_body: self.html_body,
            received_at: self.received_at,
            mailbox_uid: Some(self.uid),
        }
    }
}

/// Parses one fetched message. `fetched_at` stands in for a missing Date header.
pub fn parse_message(
    fetched: &FetchedMessage,
    uid_validity: Option<u32>,
    fetched_at: DateTime<Utc>,
) -> Result<RawMessage> {
    let message = MessageParser::default()
        .parse(&fetched.raw)
        .ok_or_else(|| EmailError::MessageError {
            uid: fetched.uid,
            reason: "not a parseable message".to_string(),
        })?;

    let message_id = match message.message_id() {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            let fallback = format!("uid:{}:{}", uid_validity.unwrap_or(0), fetched.uid);
            debug!("Message UID {} has no Message-ID, using '{}'", fetched.uid, fallback);
            fallback
        }
    };

    let received_at = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fetched_at);

    Ok(RawMessage {
        uid: fetched.uid,
        message_id,
        thread_id: first_text(message.in_reply_to()),
        subject: message.subject().map(|s| s.to_string()),
        from_address: message.from().and_then(first_address),
        to_address: message.to().and_then(first_address),
        raw_body: String::from_utf8_lossy(&fetched.raw).into_owned(),
        text_body: message.body_text(0).map(|b| b.into_owned()),
        html_body: message.body_html(0).map(|b| b.into_owned()),
        received_at,
    })
}

fn first_text(value: &HeaderValue<'_>) -> Option<String> {
    match value {
        HeaderValue::Text(text) => Some(text.to_string()),
        HeaderValue::TextList(list) => list.first().map(|t| t.to_string()),
        _ => None,
    }
}

fn first_address(address: &Address<'_>) -> Option<String> {
    address.first().map(format_address)
}

/// "Name <addr>" when a display name exists, else the bare address.
fn format_address(addr: &mail_parser::Addr) -> String {
    if let Some(name) = addr.name() {
        format!("{} <{}>", name, addr.address().unwrap_or_default())
    } else {
        addr.address().unwrap_or_default().to_string()
    }
}
