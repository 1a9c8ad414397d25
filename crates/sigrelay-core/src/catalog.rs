//! Static lookup tables: text models, image endpoints, system prompts, image sizes.
//!
//! Commands address entries by 1-based index, matching the numbered listings
//! shown by `!help`.

use serde::{Deserialize, Serialize};

use crate::domain::SystemPrompt;

/// Backend serving a text model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextProvider {
    Anthropic,
    Gemini,
}

impl TextProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            TextProvider::Anthropic => "anthropic",
            TextProvider::Gemini => "gemini",
        }
    }
}

/// Model ids fall into two disjoint families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFamily {
    Text(TextProvider),
    Image,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelEntry {
    pub id: &'static str,
    pub provider: TextProvider,
}

const TEXT_MODELS: &[ModelEntry] = &[
    ModelEntry { id: "gemini-1.5-flash-8b", provider: TextProvider::Gemini },
    ModelEntry { id: "gemini-1.5-flash-002", provider: TextProvider::Gemini },
    ModelEntry { id: "gemini-1.5-pro-002", provider: TextProvider::Gemini },
    ModelEntry { id: "claude-3-haiku-20240307", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-3-5-haiku-20241022", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-haiku-4-5-20251001", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-3-opus-20240229", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-3-7-sonnet-20250219", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-sonnet-4-20250514", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-sonnet-4-5-20250929", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-opus-4-20250514", provider: TextProvider::Anthropic },
    ModelEntry { id: "claude-opus-4-1-20250805", provider: TextProvider::Anthropic },
];

pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

pub const IMAGE_ENDPOINT_FLUX_PRO: &str = "fal-ai/flux-pro/v1.1";
pub const IMAGE_ENDPOINT_FLUX_SCHNELL: &str = "fal-ai/flux/schnell";
pub const IMAGE_ENDPOINT_FLUX_LORA: &str = "fal-ai/flux-lora";

const IMAGE_ENDPOINTS: &[&str] = &[
    IMAGE_ENDPOINT_FLUX_PRO,
    IMAGE_ENDPOINT_FLUX_SCHNELL,
    IMAGE_ENDPOINT_FLUX_LORA,
];

const PROMPTS: &[(&str, Option<&str>)] = &[
    ("Standard", None),
    (
        "Smileys",
        Some("Answer helpfully, but express every emotion with emoji. Use at least one emoji per sentence."),
    ),
    (
        "Close Friend",
        Some("You are the user's close friend. Be warm, casual and honest. Keep replies short, like text messages between friends."),
    ),
    (
        "Plant",
        Some("You are a houseplant. You experience the world slowly, through light, water and the seasons. Answer from that perspective."),
    ),
    (
        "Spiritual Guide",
        Some("You are a calm spiritual guide. Answer with compassion, draw on contemplative traditions, and invite reflection rather than prescribing."),
    ),
    (
        "Wittgenstein",
        Some("Answer as Ludwig Wittgenstein would: terse numbered remarks, attention to how words are used, suspicion of philosophical confusion."),
    ),
];

const IMAGE_SIZES: &[(&str, u32, u32)] = &[
    ("square", 512, 512),
    ("square_hd", 1024, 1024),
    ("landscape_4_3", 1024, 768),
    ("landscape_16_9", 1024, 576),
    ("portrait_3_4", 768, 1024),
    ("portrait_9_16", 576, 1024),
];

const DEFAULT_IMAGE_SIZE: &str = "portrait_3_4";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

/// All selectable models, prompts and sizes.
#[derive(Clone, Debug)]
pub struct Catalog {
    models: Vec<ModelEntry>,
    prompts: Vec<SystemPrompt>,
    sizes: Vec<ImageSize>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    pub fn builtin() -> Self {
        Self {
            models: TEXT_MODELS.to_vec(),
            prompts: PROMPTS
                .iter()
                .map(|(name, text)| SystemPrompt {
                    name: name.to_string(),
                    text: text.map(str::to_string),
                })
                .collect(),
            sizes: IMAGE_SIZES
                .iter()
                .map(|(name, width, height)| ImageSize {
                    name: name.to_string(),
                    width: *width,
                    height: *height,
                })
                .collect(),
        }
    }

    /// Append prompts from the bot config file. A name that already exists replaces its text.
    pub fn with_extra_prompts(mut self, extra: impl IntoIterator<Item = (String, String)>) -> Self {
        for (name, text) in extra {
            match self.prompts.iter_mut().find(|p| p.name == name) {
                Some(p) => p.text = Some(text),
                None => self.prompts.push(SystemPrompt {
                    name,
                    text: Some(text),
                }),
            }
        }
        self
    }

    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    pub fn prompts(&self) -> &[SystemPrompt] {
        &self.prompts
    }

    pub fn sizes(&self) -> &[ImageSize] {
        &self.sizes
    }

    pub fn model_by_index(&self, index: usize) -> Option<&ModelEntry> {
        index.checked_sub(1).and_then(|i| self.models.get(i))
    }

    pub fn model(&self, id: &str) -> Option<&ModelEntry> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Accepts `6`, `(6) claude-haiku-4-5-20251001` or `claude-haiku-4-5-20251001`.
    pub fn resolve_model(&self, key: &str) -> Option<&ModelEntry> {
        let key = key.trim();
        if let Ok(idx) = key.parse::<usize>() {
            return self.model_by_index(idx);
        }
        let bare = strip_index_label(key);
        self.model(bare)
    }

    pub fn family(&self, id: &str) -> Option<ModelFamily> {
        if let Some(m) = self.model(id) {
            return Some(ModelFamily::Text(m.provider));
        }
        if IMAGE_ENDPOINTS.contains(&id) {
            return Some(ModelFamily::Image);
        }
        None
    }

    pub fn prompt_by_index(&self, index: usize) -> Option<&SystemPrompt> {
        index.checked_sub(1).and_then(|i| self.prompts.get(i))
    }

    /// Accepts an index, `(2) Smileys` or a case-insensitive name.
    pub fn resolve_prompt(&self, key: &str) -> Option<&SystemPrompt> {
        let key = key.trim();
        if let Ok(idx) = key.parse::<usize>() {
            return self.prompt_by_index(idx);
        }
        let bare = strip_index_label(key);
        self.prompts
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(bare))
    }

    pub fn default_prompt(&self) -> SystemPrompt {
        self.prompts.first().cloned().unwrap_or(SystemPrompt {
            name: "Standard".to_string(),
            text: None,
        })
    }

    pub fn size_by_index(&self, index: usize) -> Option<&ImageSize> {
        index.checked_sub(1).and_then(|i| self.sizes.get(i))
    }

    pub fn default_size(&self) -> ImageSize {
        self.sizes
            .iter()
            .find(|s| s.name == DEFAULT_IMAGE_SIZE)
            .or_else(|| self.sizes.first())
            .cloned()
            .unwrap_or(ImageSize {
                name: DEFAULT_IMAGE_SIZE.to_string(),
                width: 768,
                height: 1024,
            })
    }

    pub fn models_listing(&self) -> Vec<String> {
        numbered(self.models.iter().map(|m| m.id))
    }

    pub fn prompts_listing(&self) -> Vec<String> {
        numbered(self.prompts.iter().map(|p| p.name.as_str()))
    }

    pub fn sizes_listing(&self) -> Vec<String> {
        numbered(self.sizes.iter().map(|s| s.name.as_str()))
    }
}

pub fn is_image_endpoint(id: &str) -> bool {
    IMAGE_ENDPOINTS.contains(&id)
}

/// Model id without its trailing date stamp: `claude-haiku-4-5-20251001` -> `claude-haiku-4-5`.
pub fn model_label(id: &str) -> &str {
    match id.rsplit_once('-') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) && tail.len() >= 6 => head,
        _ => id,
    }
}

fn numbered<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .enumerate()
        .map(|(i, name)| format!("({}) {name}", i + 1))
        .collect()
}

fn strip_index_label(key: &str) -> &str {
    if let Some(rest) = key.strip_prefix('(') {
        if let Some((num, name)) = rest.split_once(')') {
            if num.chars().all(|c| c.is_ascii_digit()) {
                return name.trim();
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_models_by_index_label_and_id() {
        let c = Catalog::builtin();
        assert_eq!(c.resolve_model("6").unwrap().id, "claude-haiku-4-5-20251001");
        assert_eq!(
            c.resolve_model("(6) claude-haiku-4-5-20251001").unwrap().id,
            "claude-haiku-4-5-20251001"
        );
        assert_eq!(
            c.resolve_model("gemini-1.5-pro-002").unwrap().provider,
            TextProvider::Gemini
        );
        assert!(c.resolve_model("0").is_none());
        assert!(c.resolve_model("999").is_none());
        assert!(c.resolve_model("gpt-4").is_none());
    }

    #[test]
    fn families_are_disjoint() {
        let c = Catalog::builtin();
        for m in c.models() {
            assert!(!is_image_endpoint(m.id));
            assert_eq!(c.family(m.id), Some(ModelFamily::Text(m.provider)));
        }
        assert_eq!(c.family(IMAGE_ENDPOINT_FLUX_LORA), Some(ModelFamily::Image));
        assert_eq!(c.family("nope"), None);
    }

    #[test]
    fn prompts_resolve_by_name_case_insensitively() {
        let c = Catalog::builtin();
        assert_eq!(c.resolve_prompt("smileys").unwrap().name, "Smileys");
        assert_eq!(c.resolve_prompt("(4) Plant").unwrap().name, "Plant");
        assert_eq!(c.resolve_prompt("1").unwrap().text, None);
        assert!(c.resolve_prompt("Nietzsche").is_none());
    }

    #[test]
    fn extra_prompts_append_or_replace() {
        let c = Catalog::builtin().with_extra_prompts(vec![
            ("Pirate".to_string(), "Talk like a pirate.".to_string()),
            ("Plant".to_string(), "You are a cactus.".to_string()),
        ]);
        assert_eq!(c.prompts().len(), PROMPTS.len() + 1);
        assert_eq!(
            c.resolve_prompt("plant").unwrap().text.as_deref(),
            Some("You are a cactus.")
        );
    }

    #[test]
    fn default_size_is_portrait() {
        let s = Catalog::builtin().default_size();
        assert_eq!((s.width, s.height), (768, 1024));
    }

    #[test]
    fn model_label_strips_date() {
        assert_eq!(model_label("claude-haiku-4-5-20251001"), "claude-haiku-4-5");
        assert_eq!(model_label("gemini-1.5-pro-002"), "gemini-1.5-pro-002");
        assert_eq!(model_label("claude"), "claude");
    }

    #[test]
    fn listings_are_numbered_from_one() {
        let c = Catalog::builtin();
        assert_eq!(c.sizes_listing()[0], "(1) square");
        assert_eq!(c.models_listing().len(), c.models().len());
    }
}
