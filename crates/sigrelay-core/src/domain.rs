use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signal account number of a bot instance (E.164, e.g. `+15550001111`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub String);

/// Stable chat id: the sender's id for direct chats, the gateway group id for groups.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

/// Where a message came from / where a reply goes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef {
    pub id: ChatId,
    pub kind: ChatKind,
}

impl ChatRef {
    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            id: ChatId(id.into()),
            kind: ChatKind::Direct,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: ChatId(id.into()),
            kind: ChatKind::Group,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ChatKind::Group
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// One entry of a chat's rolling history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
}

impl Message {
    pub fn user(sender: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
            role: Role::User,
        }
    }

    pub fn bot(sender: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
            role: Role::Bot,
        }
    }
}

/// Per-chat policy deciding which messages are recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivacyMode {
    #[serde(rename = "opt-in")]
    OptIn,
    #[serde(rename = "opt-out")]
    OptOut,
}

impl PrivacyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PrivacyMode::OptIn => "opt-in",
            PrivacyMode::OptOut => "opt-out",
        }
    }
}

impl fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivacyMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "opt-in" => Ok(PrivacyMode::OptIn),
            "opt-out" => Ok(PrivacyMode::OptOut),
            _ => Err(()),
        }
    }
}

/// System prompt currently applied to a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPrompt {
    /// Catalog name (e.g. `(2) Smileys`) or `custom`.
    pub name: String,
    /// `None` means "no system prompt".
    pub text: Option<String>,
}

impl SystemPrompt {
    pub fn custom(text: impl Into<String>) -> Self {
        Self {
            name: "custom".to_string(),
            text: Some(text.into()),
        }
    }
}

/// A configured bot account. Immutable for the process lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotInstance {
    pub name: String,
    pub phone_number: String,
    pub uuid: Option<String>,
    /// Text model id (e.g. `claude-haiku-4-5-20251001`).
    pub default_model: String,
    pub default_prompt: SystemPrompt,
}

impl BotInstance {
    pub fn id(&self) -> BotId {
        BotId(self.phone_number.clone())
    }
}
