use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ChatRef;

/// Messenger-agnostic inbound chat message, produced by the gateway adapter.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub chat: ChatRef,
    /// Sender id (phone number when known, otherwise the account UUID).
    pub sender: String,
    /// Profile name, used to label group turns and to build mentions.
    pub sender_name: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// The bot is @mentioned or the message quotes one of the bot's messages.
    pub mentions_bot: bool,
    /// Files sent along with the text; fetched lazily through the messenger.
    pub attachments: Vec<Attachment>,
}

impl IncomingMessage {
    /// Label used for this sender inside conversation history.
    pub fn display_sender(&self) -> &str {
        self.sender_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.sender)
    }
}

/// Reference to an inbound file held by the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub content_type: Option<String>,
}

impl Attachment {
    /// Untyped attachments are fetched and sniffed; typed ones must be `image/*`.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .map_or(true, |t| t.starts_with("image/"))
    }
}

/// Structured mention inside outbound text. Offsets are in UTF-16 code units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub start: usize,
    pub length: usize,
    pub author: String,
}

/// Image bytes returned by an image provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Capabilities / limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_mentions: bool,
    pub supports_attachments: bool,
    /// Outbound text longer than this is split into several messages.
    pub max_message_len: usize,
}
