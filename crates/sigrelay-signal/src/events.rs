//! Decoding of signal-cli-rest-api receive frames.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sigrelay_core::{messaging::types::Attachment, Result};

/// Who "we" are on the gateway; used to spot mentions, quotes and echoes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BotIdentity {
    pub number: String,
    pub uuid: Option<String>,
}

impl BotIdentity {
    fn is_me(&self, number: Option<&str>, uuid: Option<&str>) -> bool {
        number.is_some_and(|n| n == self.number)
            || matches!((uuid, self.uuid.as_deref()), (Some(a), Some(b)) if a == b)
    }
}

/// A user data message addressed to one bot account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    /// Phone number when the gateway exposes it, otherwise the account UUID.
    pub sender: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Gateway-internal group id; `None` for direct messages.
    pub group_internal_id: Option<String>,
    pub mentions_bot: bool,
    pub attachments: Vec<Attachment>,
}

#[derive(Deserialize)]
struct Frame {
    envelope: Option<Envelope>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    source: Option<String>,
    source_number: Option<String>,
    source_uuid: Option<String>,
    source_name: Option<String>,
    timestamp: Option<i64>,
    data_message: Option<DataMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMessage {
    message: Option<String>,
    group_info: Option<GroupInfo>,
    #[serde(default)]
    mentions: Vec<MentionRef>,
    quote: Option<Quote>,
    #[serde(default)]
    attachments: Vec<AttachmentRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentRef {
    id: Option<String>,
    content_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupInfo {
    group_id: Option<String>,
}

#[derive(Deserialize)]
struct MentionRef {
    uuid: Option<String>,
    number: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quote {
    author: Option<String>,
    author_number: Option<String>,
    author_uuid: Option<String>,
}

/// Decode one raw frame. Receipts, typing notices, sync messages and our own
/// echoes yield `Ok(None)`.
pub fn decode(raw: &str, me: &BotIdentity) -> Result<Option<InboundEvent>> {
    let frame: Frame = serde_json::from_str(raw)?;
    let Some(env) = frame.envelope else {
        return Ok(None);
    };
    let Some(data) = env.data_message else {
        return Ok(None);
    };

    let number = env
        .source_number
        .filter(|n| !n.is_empty())
        .or_else(|| env.source.clone().filter(|s| s.starts_with('+')));
    if me.is_me(number.as_deref(), env.source_uuid.as_deref()) {
        return Ok(None);
    }
    let Some(sender) = number
        .or(env.source)
        .or(env.source_uuid)
        .filter(|s| !s.is_empty())
    else {
        return Ok(None);
    };

    let mentioned = data
        .mentions
        .iter()
        .any(|m| me.is_me(m.number.as_deref(), m.uuid.as_deref()));
    let quoted = data.quote.as_ref().is_some_and(|q| {
        me.is_me(q.author.as_deref(), q.author_uuid.as_deref())
            || me.is_me(q.author_number.as_deref(), None)
    });

    let timestamp = env
        .timestamp
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Ok(Some(InboundEvent {
        sender,
        sender_name: env.source_name.filter(|n| !n.trim().is_empty()),
        text: data.message.unwrap_or_default(),
        timestamp,
        group_internal_id: data.group_info.and_then(|g| g.group_id),
        mentions_bot: mentioned || quoted,
        attachments: data
            .attachments
            .into_iter()
            .filter_map(|a| {
                Some(Attachment {
                    id: a.id.filter(|id| !id.is_empty())?,
                    content_type: a.content_type,
                })
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn me() -> BotIdentity {
        BotIdentity {
            number: "+15550000001".to_string(),
            uuid: Some("bot-uuid".to_string()),
        }
    }

    fn frame(data: serde_json::Value) -> String {
        json!({
            "envelope": {
                "source": "+15553334444",
                "sourceNumber": "+15553334444",
                "sourceUuid": "alice-uuid",
                "sourceName": "Alice",
                "timestamp": 1_700_000_000_000i64,
                "dataMessage": data
            },
            "account": "+15550000001"
        })
        .to_string()
    }

    #[test]
    fn decodes_direct_message() {
        let ev = decode(&frame(json!({"message": "hi"})), &me())
            .unwrap()
            .unwrap();
        assert_eq!(ev.sender, "+15553334444");
        assert_eq!(ev.sender_name.as_deref(), Some("Alice"));
        assert_eq!(ev.text, "hi");
        assert_eq!(ev.group_internal_id, None);
        assert!(!ev.mentions_bot);
        assert_eq!(ev.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn detects_mention_by_uuid_and_number() {
        let by_uuid = frame(json!({
            "message": "\u{FFFC} hi",
            "groupInfo": {"groupId": "abc=="},
            "mentions": [{"uuid": "bot-uuid", "start": 0, "length": 1}]
        }));
        let ev = decode(&by_uuid, &me()).unwrap().unwrap();
        assert!(ev.mentions_bot);
        assert_eq!(ev.group_internal_id.as_deref(), Some("abc=="));

        let by_number = frame(json!({
            "message": "\u{FFFC} hi",
            "mentions": [{"number": "+15550000001"}]
        }));
        assert!(decode(&by_number, &me()).unwrap().unwrap().mentions_bot);

        let other = frame(json!({"message": "x", "mentions": [{"uuid": "someone"}]}));
        assert!(!decode(&other, &me()).unwrap().unwrap().mentions_bot);
    }

    #[test]
    fn quote_of_bot_counts_as_addressed() {
        let raw = frame(json!({
            "message": "why?",
            "quote": {"id": 1, "author": "+15550000001", "authorUuid": "bot-uuid"}
        }));
        assert!(decode(&raw, &me()).unwrap().unwrap().mentions_bot);
    }

    #[test]
    fn skips_receipts_and_own_echoes() {
        let receipt = json!({"envelope": {"source": "+1", "receiptMessage": {}}}).to_string();
        assert_eq!(decode(&receipt, &me()).unwrap(), None);

        let echo = json!({
            "envelope": {"sourceNumber": "+15550000001", "dataMessage": {"message": "me"}}
        })
        .to_string();
        assert_eq!(decode(&echo, &me()).unwrap(), None);
    }

    #[test]
    fn keeps_attachment_references() {
        let raw = frame(json!({
            "attachments": [
                {"id": "abc.jpg", "contentType": "image/jpeg", "size": 1024},
                {"contentType": "image/png"}
            ]
        }));
        let ev = decode(&raw, &me()).unwrap().unwrap();
        assert_eq!(ev.text, "");
        assert_eq!(
            ev.attachments,
            vec![Attachment {
                id: "abc.jpg".to_string(),
                content_type: Some("image/jpeg".to_string()),
            }]
        );
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert!(decode("not json", &me()).is_err());
    }
}
