use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `put` and `patch` events: the data now stored at `path`, relative to the
/// location being listened to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

/// One server-sent event from a streaming Realtime Database read.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The data at `path` was replaced.
    Put(EventPayload),
    /// The children of `path` listed in `data` were replaced.
    Patch(EventPayload),
    KeepAlive,
    /// Security rules no longer allow reading the location.
    Cancel(String),
    /// The ID token used for the stream expired.
    AuthRevoked(String),
}

