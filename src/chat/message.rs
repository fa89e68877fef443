use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::database::push_id::PushKey;

/// Display name used while nobody is signed in, or when the provider has none.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("a message carries exactly one of text or photoUrl")]
pub struct InvalidMessage;

/// What a message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Photo(String),
}

/// One entry of the feed. Exactly one of text or photo URL is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    name: String,
    body: MessageBody,
}

impl Message {
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: MessageBody::Text(text.into()),
        }
    }

    pub fn photo(name: impl Into<String>, photo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: MessageBody::Photo(photo_url.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Photo(_) => None,
        }
    }

    pub fn photo_url(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Photo(url) => Some(url),
            MessageBody::Text(_) => None,
        }
    }
}

// Stored shape: `{"text": .., "name": .., "photoUrl": ..}` with null fields left out.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = InvalidMessage;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let body = match (record.text, record.photo_url) {
            (Some(text), None) => MessageBody::Text(text),
            (None, Some(url)) => MessageBody::Photo(url),
            _ => return Err(InvalidMessage),
        };
        Ok(Self {
            name: record.name.unwrap_or_else(|| ANONYMOUS.to_string()),
            body,
        })
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        let (text, photo_url) = match message.body {
            MessageBody::Text(text) => (Some(text), None),
            MessageBody::Photo(url) => (None, Some(url)),
        };
        Self {
            text,
            name: Some(message.name),
            photo_url,
        }
    }
}

/// What a feed subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Added { key: PushKey, message: Message },
    /// The backend ended the subscription; no further events follow.
    Closed { reason: String },
}
