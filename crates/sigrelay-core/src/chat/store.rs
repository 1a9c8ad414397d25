use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    chat::state::{ChatDefaults, ChatState},
    domain::{BotId, ChatId, ChatRef},
    errors::Error,
    Result,
};

/// Keyed collection of chat states for one bot instance.
///
/// Each chat sits behind its own mutex so chats never contend with each other.
/// When a persistence directory is configured, every chat is one JSON file
/// under `<dir>/<bot number>/`.
pub struct ChatStore {
    bot: BotId,
    defaults: ChatDefaults,
    dir: Option<PathBuf>,
    chats: Mutex<HashMap<ChatId, Arc<Mutex<ChatState>>>>,
}

impl ChatStore {
    pub fn new(bot: BotId, defaults: ChatDefaults, persist_root: Option<&Path>) -> Self {
        let dir = persist_root.map(|root| root.join(sanitize_component(&bot.0)));
        Self {
            bot,
            defaults,
            dir,
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn bot(&self) -> &BotId {
        &self.bot
    }

    pub fn defaults(&self) -> &ChatDefaults {
        &self.defaults
    }

    /// Existing state for `chat`, loaded from disk or created from defaults on first sight.
    pub async fn get_or_create(&self, chat: &ChatRef) -> Result<Arc<Mutex<ChatState>>> {
        if let Some(existing) = self.chats.lock().await.get(&chat.id) {
            return Ok(existing.clone());
        }

        let state = match self.load(chat).await {
            Ok(Some(mut st)) => {
                st.set_capacity(self.defaults.max_history);
                debug!(bot = %self.bot.0, chat = %chat.id.0, "loaded persisted chat state");
                st
            }
            Ok(None) => ChatState::new(chat.clone(), &self.defaults),
            Err(e) => {
                warn!(bot = %self.bot.0, chat = %chat.id.0, "ignoring unreadable chat state: {e}");
                ChatState::new(chat.clone(), &self.defaults)
            }
        };

        let mut map = self.chats.lock().await;
        Ok(map
            .entry(chat.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(state)))
            .clone())
    }

    pub async fn len(&self) -> usize {
        self.chats.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write one chat's state. No-op without a persistence directory.
    ///
    /// Callers hold the chat's lock, so writes for the same chat never interleave.
    pub async fn persist(&self, state: &ChatState) -> Result<()> {
        let Some(path) = self.path_for(&state.chat.id) else {
            return Ok(());
        };
        let Some(parent) = path.parent() else {
            return Err(Error::InvalidPath {
                path,
                reason: "no parent directory".to_string(),
            });
        };
        tokio::fs::create_dir_all(parent).await?;

        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, chat: &ChatRef) -> Result<Option<ChatState>> {
        let Some(path) = self.path_for(&chat.id) else {
            return Ok(None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: ChatState = serde_json::from_slice(&bytes)?;
        if state.chat.id != chat.id {
            return Err(Error::InvalidPath {
                path,
                reason: "file belongs to a different chat".to_string(),
            });
        }
        Ok(Some(state))
    }

    fn path_for(&self, chat: &ChatId) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let digest = Sha256::digest(chat.0.as_bytes());
        Some(dir.join(format!("{digest:x}.json")))
    }
}

fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '+' { c } else { '_' })
        .collect()
}
