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

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: API_URL.to_string(),
            http: http_client(Duration::from_secs(300))?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl TextModel for AnthropicClient {
    fn provider(&self) -> TextProvider {
        TextProvider::Anthropic
    }

    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        let body = request_body(&req);
        debug!(model = %req.model, "anthropic request");

        let resp = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("anthropic request error: {e}")))?;
        let resp = check_status("anthropic", resp).await?;

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Provider(format!("anthropic json error: {e}")))?;
        parse_response(&v)
    }
}

fn request_body(req: &CompletionRequest) -> Value {
    let messages: Vec<Value> = alternate_turns(&req.messages)
        .into_iter()
        .map(|t| {
            let role = match t.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            if t.images.is_empty() {
                return json!({ "role": role, "content": t.content });
            }
            let mut blocks: Vec<Value> = t
                .images
                .iter()
                .map(|img| {
                    json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": img.mime_type,
                            "data": encode_image(img),
                        }
                    })
                })
                .collect();
            if !t.content.trim().is_empty() {
                blocks.push(json!({ "type": "text", "text": t.content }));
            }
            json!({ "role": role, "content": blocks })
        })
        .collect();

    let mut body = json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
    });
    if let Some(system) = req.system.as_deref().filter(|s| !s.trim().is_empty()) {
        body["system"] = json!(system);
    }
    body
}

fn parse_response(v: &Value) -> Result<String> {
    let text: String = v
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if v.get("stop_reason").and_then(Value::as_str) == Some("refusal") {
        let msg = if text.trim().is_empty() {
            "The model declined to answer this request.".to_string()
        } else {
            text
        };
        return Err(Error::ContentPolicy(msg));
    }
    if text.trim().is_empty() {
        return Err(Error::Provider("anthropic returned an empty reply".to_string()));
    }
    Ok(text)
}
