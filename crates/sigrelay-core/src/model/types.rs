use crate::{catalog::ImageSize, messaging::types::GeneratedImage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// An image handed to a text model together with a user turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    /// Accepts `data` only if it is an image: the declared type wins when it
    /// is `image/*`, otherwise the leading bytes decide.
    pub fn detect(data: Vec<u8>, declared: Option<&str>) -> Option<Self> {
        let mime_type = match declared.filter(|t| t.starts_with("image/")) {
            Some(t) => t.to_string(),
            None => sniff_image_type(&data)?.to_string(),
        };
        Some(Self { mime_type, data })
    }
}

fn sniff_image_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// One role-tagged message of the context sent to a text model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    /// Only ever set on the newest user turn.
    pub images: Vec<InlineImage>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<InlineImage>) -> Self {
        self.images = images;
        self
    }
}

/// Normalized text-completion request.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatTurn>,
    pub max_tokens: u32,
}

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone, Debug, PartialEq)]
pub struct Lora {
    pub path: String,
    pub scale: f32,
}

/// Normalized image-generation request.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageRequest {
    pub endpoint: String,
    pub prompt: String,
    pub size: ImageSize,
    pub loras: Vec<Lora>,
}

#[derive(Clone, Debug)]
pub enum DispatchRequest {
    Chat(CompletionRequest),
    Image(ImageRequest),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Image(GeneratedImage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_images_by_declared_type_or_magic_bytes() {
        let png = b"\x89PNG\r\n\x1a\n rest".to_vec();
        assert_eq!(
            InlineImage::detect(png.clone(), None).map(|i| i.mime_type),
            Some("image/png".to_string())
        );
        assert_eq!(
            InlineImage::detect(png, Some("image/webp")).map(|i| i.mime_type),
            Some("image/webp".to_string())
        );
        assert_eq!(
            InlineImage::detect(vec![0xFF, 0xD8, 0xFF, 0xE0], Some("application/octet-stream"))
                .map(|i| i.mime_type),
            Some("image/jpeg".to_string())
        );
        assert_eq!(InlineImage::detect(b"%PDF-1.7".to_vec(), Some("application/pdf")), None);
    }
}
