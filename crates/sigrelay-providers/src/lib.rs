//! Provider adapters: Anthropic Messages, Gemini `generateContent` and fal.ai
//! image endpoints, all behind the core model ports.

use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sigrelay_core::{
    config::Config,
    errors::Error,
    model::{
        types::{ChatRole, ChatTurn, InlineImage},
        Dispatcher,
    },
    Result,
};
use tracing::info;

pub mod anthropic;
pub mod fal;
pub mod gemini;

pub use anthropic::AnthropicClient;
pub use fal::FalClient;
pub use gemini::GeminiClient;

/// Wire up every provider that has a key configured.
pub fn build_dispatcher(cfg: &Config) -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new(cfg.catalog.clone(), cfg.provider_timeout);
    if let Some(key) = &cfg.anthropic_api_key {
        dispatcher = dispatcher.with_text_model(Arc::new(AnthropicClient::new(key.clone())?));
        info!("anthropic provider enabled");
    }
    if let Some(key) = &cfg.google_api_key {
        dispatcher = dispatcher.with_text_model(Arc::new(GeminiClient::new(key.clone())?));
        info!("gemini provider enabled");
    }
    if let Some(key) = &cfg.fal_key {
        dispatcher = dispatcher.with_image_model(Arc::new(FalClient::new(key.clone())?));
        info!("fal.ai image provider enabled");
    }
    Ok(dispatcher)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("http client build failed: {e}")))
}

/// Turn a non-success response into a provider error with a short body excerpt.
pub(crate) async fn check_status(name: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let reason = match status.as_u16() {
        429 => "rate limited",
        529 => "overloaded",
        _ => "request failed",
    };
    Err(Error::Provider(format!(
        "{name} {reason}: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}

/// Collapse consecutive turns of one role and drop leading assistant turns;
/// chat APIs expect a user-first, alternating transcript.
pub(crate) fn alternate_turns(turns: &[ChatTurn]) -> Vec<ChatTurn> {
    let mut out: Vec<ChatTurn> = Vec::with_capacity(turns.len());
    for turn in turns
        .iter()
        .skip_while(|t| t.role == ChatRole::Assistant)
        .filter(|t| !t.content.trim().is_empty() || !t.images.is_empty())
    {
        match out.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&turn.content);
                last.images.extend(turn.images.iter().cloned());
            }
            _ => out.push(turn.clone()),
        }
    }
    out
}

pub(crate) fn encode_image(image: &InlineImage) -> String {
    BASE64.encode(&image.data)
}
