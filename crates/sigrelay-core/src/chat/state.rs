use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::ImageSize,
    domain::{ChatRef, Message, PrivacyMode, SystemPrompt},
};

/// Values a new chat starts from (bot defaults + global config).
#[derive(Clone, Debug)]
pub struct ChatDefaults {
    pub privacy_mode: PrivacyMode,
    pub model: String,
    pub prompt: SystemPrompt,
    pub image_size: ImageSize,
    pub max_history: usize,
}

/// A single field of a chat's session overrides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Override {
    Model(String),
    Prompt(SystemPrompt),
    ImageSize(ImageSize),
    Privacy(PrivacyMode),
}

/// Everything the relay remembers about one chat of one bot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    pub chat: ChatRef,
    pub privacy_mode: PrivacyMode,
    pub active_model: String,
    pub active_prompt: SystemPrompt,
    pub image_size: ImageSize,
    pub last_activity: Option<DateTime<Utc>>,
    history: VecDeque<Message>,
    #[serde(skip, default = "default_capacity")]
    max_history: usize,
}

fn default_capacity() -> usize {
    50
}

impl ChatState {
    pub fn new(chat: ChatRef, defaults: &ChatDefaults) -> Self {
        Self {
            chat,
            privacy_mode: defaults.privacy_mode,
            active_model: defaults.model.clone(),
            active_prompt: defaults.prompt.clone(),
            image_size: defaults.image_size.clone(),
            last_activity: None,
            history: VecDeque::new(),
            max_history: defaults.max_history.max(1),
        }
    }

    pub fn history(&self) -> &VecDeque<Message> {
        &self.history
    }

    pub fn capacity(&self) -> usize {
        self.max_history
    }

    /// Change the history cap (e.g. after loading persisted state), evicting as needed.
    pub fn set_capacity(&mut self, max_history: usize) {
        self.max_history = max_history.max(1);
        self.evict();
    }

    /// Append to the rolling history; the oldest entries are evicted first.
    pub fn append_message(&mut self, message: Message) {
        self.history.push_back(message);
        self.evict();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Apply an override. A new model or prompt starts a fresh conversation.
    pub fn set_override(&mut self, value: Override) {
        match value {
            Override::Model(model) => {
                self.active_model = model;
                self.history.clear();
            }
            Override::Prompt(prompt) => {
                self.active_prompt = prompt;
                self.history.clear();
            }
            Override::ImageSize(size) => self.image_size = size,
            Override::Privacy(mode) => self.privacy_mode = mode,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = Some(now);
    }

    /// True when the chat has been idle longer than `timeout`.
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let Some(last) = self.last_activity else {
            return false;
        };
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now.signed_duration_since(last) > timeout,
            Err(_) => false,
        }
    }

    fn evict(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn defaults(max_history: usize) -> ChatDefaults {
        let catalog = Catalog::builtin();
        ChatDefaults {
            privacy_mode: PrivacyMode::OptOut,
            model: "claude-haiku-4-5-20251001".to_string(),
            prompt: catalog.default_prompt(),
            image_size: catalog.default_size(),
            max_history,
        }
    }

    fn msg(i: usize) -> Message {
        Message::user("+1", format!("m{i}"), Utc::now())
    }

    #[test]
    fn history_never_exceeds_cap_and_evicts_oldest() {
        let mut st = ChatState::new(ChatRef::group("G1"), &defaults(3));
        for i in 0..10 {
            st.append_message(msg(i));
            assert!(st.history().len() <= 3);
        }
        let texts: Vec<_> = st.history().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m7", "m8", "m9"]);
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let mut st = ChatState::new(ChatRef::group("G1"), &defaults(5));
        for i in 0..5 {
            st.append_message(msg(i));
        }
        st.set_capacity(2);
        assert_eq!(st.history().len(), 2);
        assert_eq!(st.history()[0].text, "m3");
    }

    #[test]
    fn model_and_prompt_overrides_reset_history() {
        let mut st = ChatState::new(ChatRef::direct("+1"), &defaults(5));
        st.append_message(msg(0));
        st.set_override(Override::Privacy(PrivacyMode::OptIn));
        assert_eq!(st.history().len(), 1);
        st.set_override(Override::Model("gemini-1.5-pro-002".to_string()));
        assert_eq!(st.active_model, "gemini-1.5-pro-002");
        assert!(st.history().is_empty());

        st.append_message(msg(1));
        st.set_override(Override::Prompt(SystemPrompt::custom("be brief")));
        assert!(st.history().is_empty());
        assert_eq!(st.active_prompt.text.as_deref(), Some("be brief"));
    }

    #[test]
    fn idle_detection() {
        let mut st = ChatState::new(ChatRef::direct("+1"), &defaults(5));
        let now = Utc::now();
        assert!(!st.is_idle(now, Duration::from_secs(60)));
        st.touch(now - chrono::Duration::minutes(31));
        assert!(st.is_idle(now, Duration::from_secs(30 * 60)));
        assert!(!st.is_idle(now, Duration::from_secs(60 * 60)));
    }
}
