//! Signal adapter over signal-cli-rest-api.
//!
//! This crate implements the `sigrelay-core` MessagingPort over the gateway's
//! REST API and feeds its WebSocket event stream into per-bot routers.

use std::{collections::HashMap, path::Path, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub mod events;
pub mod receiver;
pub mod router;

use sigrelay_core::{
    domain::ChatRef,
    errors::Error,
    formatting::split_with_mentions,
    messaging::{
        port::MessagingPort,
        types::{GeneratedImage, Mention, MessagingCapabilities},
    },
    Result,
};

#[derive(Serialize)]
struct SendPayload<'a> {
    number: &'a str,
    recipients: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    text_mode: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    base64_attachments: Vec<String>,
    #[serde(skip_serializing_if = "no_mentions")]
    mentions: &'a [Mention],
}

fn no_mentions(m: &&[Mention]) -> bool {
    m.is_empty()
}

#[derive(Deserialize)]
struct GroupEntry {
    id: String,
    internal_id: String,
}

#[derive(Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<AccountEntry>,
}

#[derive(Deserialize)]
struct AccountEntry {
    number: Option<String>,
    uuid: Option<String>,
}

/// Outbound side of one bot account.
pub struct SignalMessenger {
    http: reqwest::Client,
    base_url: String,
    number: String,
    chunk_len: usize,
    /// internal group id -> API group id
    groups: Mutex<HashMap<String, String>>,
}

impl SignalMessenger {
    pub fn new(
        base_url: impl Into<String>,
        number: impl Into<String>,
        chunk_len: usize,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            number: number.into(),
            chunk_len,
            groups: Mutex::new(HashMap::new()),
        })
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    /// Set the account's profile name (best-effort at startup).
    pub async fn set_profile_name(&self, name: &str) -> Result<()> {
        let url = format!("{}/v1/profiles/{}", self.base_url, self.number);
        let resp = self
            .http
            .put(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("profile update failed: {e}")))?;
        check_status("profile update", resp).await
    }

    /// Address for `/v2/send`. Group chats are keyed by the envelope's
    /// internal id and translated here, at send time.
    pub async fn recipient(&self, chat: &ChatRef) -> String {
        if chat.is_group() {
            self.resolve_group(&chat.id.0).await
        } else {
            chat.id.0.clone()
        }
    }

    /// Map a group id from an envelope to the id `/v2/send` accepts.
    pub async fn resolve_group(&self, internal_id: &str) -> String {
        if let Some(id) = self.groups.lock().await.get(internal_id) {
            return id.clone();
        }

        match self.fetch_groups().await {
            Ok(groups) => {
                let mut cache = self.groups.lock().await;
                for g in groups {
                    cache.insert(g.internal_id, g.id);
                }
                if let Some(id) = cache.get(internal_id) {
                    return id.clone();
                }
            }
            Err(e) => warn!(bot = %self.number, "group lookup failed: {e}"),
        }
        fallback_group_id(internal_id)
    }

    async fn fetch_groups(&self) -> Result<Vec<GroupEntry>> {
        let url = format!("{}/v1/groups/{}", self.base_url, self.number);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("group list failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Gateway(format!("group list failed: {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| Error::Gateway(format!("group list json error: {e}")))
    }

    async fn post(&self, payload: &SendPayload<'_>) -> Result<()> {
        let url = format!("{}/v2/send", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("send failed: {e}")))?;
        check_status("send", resp).await
    }

    fn payload<'a>(&'a self, recipient: &'a str) -> SendPayload<'a> {
        SendPayload {
            number: &self.number,
            recipients: vec![recipient],
            message: None,
            text_mode: "styled",
            base64_attachments: Vec::new(),
            mentions: &[],
        }
    }
}

#[async_trait]
impl MessagingPort for SignalMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_mentions: true,
            supports_attachments: true,
            max_message_len: self.chunk_len,
        }
    }

    async fn send_text(&self, chat: &ChatRef, text: &str, mentions: &[Mention]) -> Result<()> {
        let recipient = self.recipient(chat).await;
        let chunks = split_with_mentions(text, mentions, self.chunk_len);
        let total = chunks.len();
        for (i, (chunk, chunk_mentions)) in chunks.iter().enumerate() {
            let payload = SendPayload {
                message: Some(chunk.as_str()),
                mentions: chunk_mentions,
                ..self.payload(&recipient)
            };
            self.post(&payload).await?;
            debug!(bot = %self.number, chat = %chat.id.0, chunk = i + 1, total, "message sent");
        }
        Ok(())
    }

    async fn send_image(&self, chat: &ChatRef, image: &GeneratedImage) -> Result<()> {
        let recipient = self.recipient(chat).await;
        let payload = SendPayload {
            base64_attachments: vec![BASE64.encode(&image.bytes)],
            ..self.payload(&recipient)
        };
        self.post(&payload).await?;
        debug!(bot = %self.number, chat = %chat.id.0, bytes = image.bytes.len(), "image sent");
        Ok(())
    }

    async fn fetch_attachment(&self, id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/attachments/{id}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("attachment download failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Gateway(format!(
                "attachment download failed: {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Gateway(format!("attachment download failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

async fn check_status(what: &str, resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Gateway(format!(
        "{what} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}

fn fallback_group_id(internal_id: &str) -> String {
    if internal_id.starts_with("group.") {
        internal_id.to_string()
    } else {
        format!("group.{internal_id}")
    }
}

/// Look up an account's UUID in the gateway's `accounts.json`.
pub async fn lookup_uuid(accounts_file: &Path, number: &str) -> Option<String> {
    let bytes = tokio::fs::read(accounts_file).await.ok()?;
    let file: AccountsFile = serde_json::from_slice(&bytes).ok()?;
    uuid_for(&file, number)
}

fn uuid_for(file: &AccountsFile, number: &str) -> Option<String> {
    file.accounts
        .iter()
        .find(|a| a.number.as_deref() == Some(number))
        .and_then(|a| a.uuid.clone())
        .filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn payload_omits_empty_fields() {
        let m = SignalMessenger::new("http://gw:8080/", "+1555", 400).unwrap();
        let payload = SendPayload {
            message: Some("hi"),
            ..m.payload("group.abc")
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "number": "+1555",
                "recipients": ["group.abc"],
                "message": "hi",
                "text_mode": "styled"
            })
        );
        assert_eq!(m.base_url, "http://gw:8080");
    }

    #[test]
    fn payload_carries_mentions() {
        let m = SignalMessenger::new("http://gw", "+1555", 400).unwrap();
        let mentions = vec![Mention {
            start: 0,
            length: 1,
            author: "+1888".to_string(),
        }];
        let payload = SendPayload {
            message: Some("\u{FFFC} hi"),
            mentions: &mentions,
            ..m.payload("+1777")
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["mentions"][0]["author"], "+1888");
        assert_eq!(v["mentions"][0]["start"], 0);
    }

    #[tokio::test]
    async fn group_chats_resolve_to_the_api_id_at_send_time() {
        let m = SignalMessenger::new("http://gw", "+1555", 400).unwrap();
        m.groups
            .lock()
            .await
            .insert("abc==".to_string(), "group.YWJjPT0=".to_string());
        assert_eq!(m.recipient(&ChatRef::group("abc==")).await, "group.YWJjPT0=");
        assert_eq!(m.recipient(&ChatRef::direct("+1777")).await, "+1777");
    }

    #[test]
    fn group_fallback_adds_prefix_once() {
        assert_eq!(fallback_group_id("abc=="), "group.abc==");
        assert_eq!(fallback_group_id("group.abc"), "group.abc");
    }

    #[tokio::test]
    async fn reads_uuid_from_accounts_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"accounts":[{{"number":"+1555","uuid":"u-1"}},{{"number":"+1666"}}]}}"#
        )
        .unwrap();
        assert_eq!(lookup_uuid(f.path(), "+1555").await.as_deref(), Some("u-1"));
        assert_eq!(lookup_uuid(f.path(), "+1666").await, None);
        assert_eq!(lookup_uuid(Path::new("/nonexistent/accounts.json"), "+1555").await, None);
    }
}
