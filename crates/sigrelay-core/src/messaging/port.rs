use async_trait::async_trait;

use crate::{
    domain::ChatRef,
    errors::Error,
    messaging::types::{GeneratedImage, Mention, MessagingCapabilities},
    Result,
};

/// Outbound messenger port, one implementation per bot account.
///
/// Each call is one logical send; splitting long text into several wire
/// messages is the adapter's job.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_text(&self, chat: &ChatRef, text: &str, mentions: &[Mention]) -> Result<()>;

    async fn send_image(&self, chat: &ChatRef, image: &GeneratedImage) -> Result<()>;

    /// Raw bytes of an inbound attachment.
    async fn fetch_attachment(&self, id: &str) -> Result<Vec<u8>> {
        Err(Error::Gateway(format!("cannot fetch attachment {id}")))
    }
}
