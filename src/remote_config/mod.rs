//! Firebase Remote Config module.
//!
//! Client-side Remote Config: in-app defaults, values downloaded by [`FirebaseRemoteConfig::fetch`],
//! and the active values that reads are served from. Fetched values only become
//! visible after [`FirebaseRemoteConfig::activate`].
//!
//! # Caching
//!
//! A fetch is skipped when the last successful fetch is younger than the requested
//! cache age (by default the configured minimum fetch interval).

pub mod models;

use crate::core::build_client;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use models::{FetchRequest, FetchResponse, FetchState, RemoteConfigSettings};
use rand::Rng;
use reqwest_middleware::ClientWithMiddleware;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const REMOTE_CONFIG_V1_API: &str =
    "https://firebaseremoteconfig.googleapis.com/v1/projects/{project_id}/namespaces/firebase";

const SDK_VERSION: &str = concat!("friendlychat-rs/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, serde::Deserialize)]
struct ApiError {
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorWrapper {
    error: ApiError,
}

/// Errors that can occur during Remote Config operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Firebase options do not contain a project ID.
    #[error("the firebase options are missing the project_id")]
    ProjectIdMissing,
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("an error occurred while sending the request: {0}")]
    Request(#[from] reqwest_middleware::Error),
    /// Wrapper for `reqwest::Error`.
    #[error("an error occurred while sending the request: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Wrapper for `serde_json::Error`.
    #[error("an error occurred while serializing/deserializing JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Error returned by the Remote Config API.
    #[error("the firebase API returned an error: {code} {status}: {message}")]
    Api {
        code: u16,
        message: String,
        status: String,
    },
}

/// Whether a fetch reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// New values were downloaded and wait for activation.
    Fetched,
    /// The backend reported no change since the last fetch.
    NotModified,
    /// The last fetch is younger than the requested cache age; nothing was sent.
    Cached,
}

#[derive(Debug, Default)]
struct ConfigState {
    defaults: HashMap<String, String>,
    fetched: Option<HashMap<String, String>>,
    active: HashMap<String, String>,
    last_fetch: Option<DateTime<Utc>>,
}

/// Client for fetching Remote Config values on behalf of one app instance.
pub struct FirebaseRemoteConfig {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    app_id: String,
    instance_id: String,
    settings: RwLock<RemoteConfigSettings>,
    state: RwLock<ConfigState>,
}

impl FirebaseRemoteConfig {
    /// Creates a new `FirebaseRemoteConfig` instance.
    ///
    /// This is typically called via `FirebaseApp::remote_config()`.
    pub fn new(project_id: &str, api_key: &str, app_id: &str) -> Result<Self, Error> {
        if project_id.is_empty() {
            return Err(Error::ProjectIdMissing);
        }
        let base_url = REMOTE_CONFIG_V1_API.replace("{project_id}", project_id);
        Ok(Self::new_with_client(build_client(None), base_url, api_key, app_id))
    }

    /// Creates a new `FirebaseRemoteConfig` instance with a custom client and base URL.
    pub fn new_with_client(
        client: ClientWithMiddleware,
        base_url: String,
        api_key: &str,
        app_id: &str,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            app_id: app_id.to_string(),
            instance_id: generate_instance_id(),
            settings: RwLock::new(RemoteConfigSettings::default()),
            state: RwLock::new(ConfigState::default()),
        }
    }

    /// The identifier this app instance reports to the backend.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn set_config_settings(&self, settings: RemoteConfigSettings) {
        *self.settings.write().await = settings;
    }

    /// Replaces the in-app defaults.
    pub async fn set_defaults<K, V>(&self, defaults: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: ToString,
    {
        self.state.write().await.defaults = defaults
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
    }

    /// Fetches values, honouring the configured minimum fetch interval.
    pub async fn fetch(&self) -> Result<FetchStatus, Error> {
        let interval = self.settings.read().await.minimum_fetch_interval;
        self.fetch_with_max_age(interval).await
    }

    /// Fetches values unless the last successful fetch is younger than `max_age`.
    pub async fn fetch_with_max_age(&self, max_age: Duration) -> Result<FetchStatus, Error> {
        let now = Utc::now();
        if let Some(last) = self.state.read().await.last_fetch {
            let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
            if now.signed_duration_since(last) < max_age {
                debug!(last_fetch = %last, "serving remote config from cache");
                return Ok(FetchStatus::Cached);
            }
        }

        let request = FetchRequest {
            app_instance_id: &self.instance_id,
            app_id: &self.app_id,
            sdk_version: SDK_VERSION,
            language_code: None,
        };
        let url = format!("{}:fetch", self.base_url);
        let req = self
            .client
            .post(url)
            .query(&[("key", &self.api_key)])
            .json(&request);
        let response: FetchResponse = self.request(req).await?;

        let mut state = self.state.write().await;
        state.last_fetch = Some(now);
        let status = match response.state {
            Some(FetchState::NoChange) => FetchStatus::NotModified,
            Some(FetchState::NoTemplate) | Some(FetchState::EmptyConfig) => {
                state.fetched = Some(HashMap::new());
                FetchStatus::Fetched
            }
            Some(FetchState::Update) | Some(FetchState::InstanceStateUnspecified) | None => {
                state.fetched = Some(response.entries.unwrap_or_default());
                FetchStatus::Fetched
            }
        };
        debug!(
            ?status,
            template_version = response.template_version.as_deref().unwrap_or("-"),
            "remote config fetched"
        );
        Ok(status)
    }

    /// Makes the last fetched values active. Returns `false` if there was nothing new to activate.
    pub async fn activate(&self) -> bool {
        let mut state = self.state.write().await;
        match state.fetched.take() {
            Some(fetched) => {
                state.active = fetched;
                true
            }
            None => false,
        }
    }

    pub async fn fetch_and_activate(&self) -> Result<bool, Error> {
        self.fetch().await?;
        Ok(self.activate().await)
    }

    /// Reads a value from the active values, falling back to the defaults.
    pub async fn get_string(&self, key: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .active
            .get(key)
            .or_else(|| state.defaults.get(key))
            .cloned()
    }

    /// Reads an integer. Values that do not parse are skipped in favour of the next source.
    pub async fn get_i64(&self, key: &str) -> i64 {
        let state = self.state.read().await;
        for (source, value) in [("active", state.active.get(key)), ("default", state.defaults.get(key))] {
            let Some(value) = value else { continue };
            match value.trim().parse::<i64>() {
                Ok(parsed) => return parsed,
                Err(_) => warn!(key, value = %value, source, "remote config value is not an integer"),
            }
        }
        0
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest_middleware::RequestBuilder,
    ) -> Result<T, Error> {
        let response = req.send().await?;
        if !response.status().is_success() {
            let error: ErrorWrapper = response.json().await?;
            return Err(Error::Api {
                code: error.error.code,
                message: error.error.message,
                status: error.error.status,
            });
        }
        Ok(response.json().await?)
    }
}

// Same shape as a Firebase installation ID: 17 random bytes with the `0111` prefix,
// base64url encoded and cut to 22 characters.
fn generate_instance_id() -> String {
    let mut bytes = [0u8; 17];
    rand::rng().fill(&mut bytes);
    bytes[0] = 0b0111_0000 | (bytes[0] & 0b0000_1111);
    let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.truncate(22);
    encoded
}
