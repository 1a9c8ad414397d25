use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sigrelay_core::{
    catalog::TextProvider,
    errors::Error,
    model::{
        client::TextModel,
        types::{ChatRole, CompletionRequest},
    },
    Result,
};
use tracing::debug;

use crate::{alternate_turns, check_status, encode_image, http_client};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Clone, Debug)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            http: http_client(Duration::from_secs(300))?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    fn provider(&self) -> TextProvider {
        TextProvider::Gemini
    }

    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        let url = format!("{}/{}:generateContent", self.base_url, req.model);
        debug!(model = %req.model, "gemini request");

        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request_body(&req))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("gemini request error: {e}")))?;
        let resp = check_status("gemini", resp).await?;

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("gemini json error: {e}")))?;
        parse_response(&v)
    }
}

fn request_body(req: &CompletionRequest) -> Value {
    let contents: Vec<Value> = alternate_turns(&req.messages)
        .into_iter()
        .map(|t| {
            let role = match t.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
            };
            let mut parts: Vec<Value> = t
                .images
                .iter()
                .map(|img| {
                    json!({ "inlineData": { "mimeType": img.mime_type, "data": encode_image(img) } })
                })
                .collect();
            if !t.content.trim().is_empty() || parts.is_empty() {
                parts.push(json!({ "text": t.content }));
            }
            json!({ "role": role, "parts": parts })
        })
        .collect();

    let mut body = json!({
        "contents": contents,
        "generationConfig": { "maxOutputTokens": req.max_tokens },
    });
    if let Some(system) = req.system.as_deref().filter(|s| !s.trim().is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

fn parse_response(v: &Value) -> Result<String> {
    if let Some(reason) = v
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(Error::ContentPolicy(format!(
            "Your message was blocked by the model's safety filters ({reason})."
        )));
    }

    let candidate = v.pointer("/candidates/0");
    let text: String = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let finish = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str);
    if text.trim().is_empty() {
        if let Some(reason @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "RECITATION")) = finish {
            return Err(Error::ContentPolicy(format!(
                "The response was withheld by the model's safety filters ({reason})."
            )));
        }
        return Err(Error::Provider("gemini returned an empty reply".to_string()));
    }
    Ok(text)
}
