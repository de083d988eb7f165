//! Mailbox access and the normalized message shape used for email events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{Address, MessageParser, MimeHeaders};
use serde::Serialize;
use serde_json::{json, Value};
use sluice_core::ImapConnection;

use crate::error::Result;

/// Attachment metadata; contents are never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub uid: u32,
    pub subject: Option<String>,
    /// First sender address, lowercased.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub date: Option<DateTime<Utc>>,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MailMessage {
    pub fn has_attachment(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Event document handed to rules and jobs.
    pub fn to_event(&self) -> Value {
        json!({
            "uid": self.uid,
            "subject": self.subject,
            "from": self.from,
            "to": self.to,
            "cc": self.cc,
            "date": self.date.map(|d| d.to_rfc3339()),
            "body": self.body,
            "hasAttachment": self.has_attachment(),
            "attachments": self.attachments,
        })
    }
}

/// Outcome of one UID fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailBatch {
    /// Parsed messages, ascending by UID.
    pub messages: Vec<MailMessage>,
    /// Highest new UID the server returned, including messages that could
    /// not be parsed.
    pub highest_uid: Option<u32>,
}

impl MailBatch {
    /// A batch in which every fetched message parsed.
    pub fn from_messages(messages: Vec<MailMessage>) -> Self {
        let highest_uid = messages.iter().map(|m| m.uid).max();
        Self {
            messages,
            highest_uid,
        }
    }
}

/// IMAP operations the mailbox poller depends on.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Messages with a UID strictly greater than `last_uid`, ascending.
    async fn fetch_since(
        &self,
        conn: &ImapConnection,
        folder: &str,
        last_uid: u32,
    ) -> Result<MailBatch>;

    /// Set `\Seen` on the given UIDs. An empty slice is a no-op.
    async fn mark_seen(&self, conn: &ImapConnection, folder: &str, uids: &[u32]) -> Result<()>;

    /// Highest UID currently assigned in `folder`, or 0 when empty.
    async fn current_max_uid(&self, conn: &ImapConnection, folder: &str) -> Result<u32>;
}

fn addresses(addr: Option<&Address<'_>>) -> Vec<String> {
    addr.map(|a| {
        a.iter()
            .filter_map(|a| a.address())
            .map(|a| a.to_ascii_lowercase())
            .collect()
    })
    .unwrap_or_default()
}

/// Parse a raw RFC 822 message. Returns `None` if it has no parsable headers.
pub fn parse_message(uid: u32, raw: &[u8]) -> Option<MailMessage> {
    let message = MessageParser::default().parse(raw)?;

    let attachments = message
        .attachments()
        .map(|part| Attachment {
            filename: part.attachment_name().map(str::to_string),
            content_type: part.content_type().map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            }),
            size: part.contents().len(),
        })
        .collect();

    Some(MailMessage {
        uid,
        subject: message.subject().map(str::to_string),
        from: addresses(message.from()).into_iter().next(),
        to: addresses(message.to()),
        cc: addresses(message.cc()),
        date: message
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0)),
        body: message.body_text(0).map(|b| b.into_owned()),
        attachments,
    })
}
