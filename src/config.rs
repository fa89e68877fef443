//! App configuration.
//!
//! [`FirebaseOptions`] identifies the Firebase project and is usually read from the
//! `google-services.json` file downloaded from the Firebase console.
//! [`ChatSettings`] holds the chat's own knobs; every field has a default.

use crate::auth::SignInProvider;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config document is missing {0}")]
    Missing(&'static str),
}

/// Identifies the Firebase project and app the client talks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirebaseOptions {
    pub api_key: String,
    pub app_id: String,
    pub project_id: String,
    #[serde(default)]
    pub project_number: Option<String>,
    pub database_url: String,
    pub storage_bucket: String,
}

#[derive(Debug, Deserialize)]
struct GoogleServices {
    project_info: ProjectInfo,
    #[serde(default)]
    client: Vec<ClientEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    project_id: String,
    #[serde(default)]
    project_number: Option<String>,
    #[serde(default)]
    firebase_url: Option<String>,
    #[serde(default)]
    storage_bucket: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientEntry {
    client_info: ClientInfo,
    #[serde(default)]
    api_key: Vec<ApiKey>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    mobilesdk_app_id: String,
}

#[derive(Debug, Deserialize)]
struct ApiKey {
    current_key: String,
}

impl FirebaseOptions {
    /// Parses a `google-services.json` document. The first client entry is used.
    pub fn from_google_services_json(document: &str) -> Result<Self, ConfigError> {
        let services: GoogleServices = serde_json::from_str(document)?;
        let client = services
            .client
            .into_iter()
            .next()
            .ok_or(ConfigError::Missing("client"))?;
        let api_key = client
            .api_key
            .into_iter()
            .next()
            .map(|k| k.current_key)
            .ok_or(ConfigError::Missing("client[0].api_key"))?;
        let info = services.project_info;

        Ok(Self {
            api_key,
            app_id: client.client_info.mobilesdk_app_id,
            database_url: info
                .firebase_url
                .ok_or(ConfigError::Missing("project_info.firebase_url"))?,
            storage_bucket: info
                .storage_bucket
                .ok_or(ConfigError::Missing("project_info.storage_bucket"))?,
            project_id: info.project_id,
            project_number: info.project_number,
        })
    }

    pub fn from_google_services_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path)?;
        Self::from_google_services_json(&document)
    }
}

/// Chat behaviour that is not owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Database location of the feed.
    pub messages_path: String,
    /// Storage folder that picked photos are uploaded to.
    pub photos_path: String,
    /// Remote Config key holding the message length limit.
    pub length_limit_key: String,
    pub default_length_limit: usize,
    /// Fetched config younger than this is reused.
    pub config_cache_expiration_secs: u64,
    pub sign_in_providers: Vec<SignInProvider>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            messages_path: "messages".to_string(),
            photos_path: "chat_photos".to_string(),
            length_limit_key: "friendly_msg_length".to_string(),
            default_length_limit: 10,
            config_cache_expiration_secs: 3600,
            sign_in_providers: vec![SignInProvider::Email, SignInProvider::google()],
        }
    }
}

impl ChatSettings {
    /// Reads settings from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&document)?)
    }
}
