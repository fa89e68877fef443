pub mod auth;
pub mod chat;
pub mod config;
pub mod core;
pub mod database;
pub mod logging;
pub mod remote_config;
pub mod storage;

use crate::auth::FirebaseAuth;
use crate::chat::adapters::firebase::{FirebaseMessageStore, FirebasePhotoStore};
use crate::chat::ChatAdapters;
use crate::config::{ChatSettings, FirebaseOptions};
use crate::core::middleware::TokenSource;
use crate::database::FirebaseDatabase;
use crate::remote_config::FirebaseRemoteConfig;
use crate::storage::FirebaseStorage;
use std::sync::Arc;

/// Entry point: builds service clients for one Firebase app.
///
/// All clients share the app's [`FirebaseAuth`], so database and storage requests
/// carry the signed-in user's ID token.
pub struct FirebaseApp {
    options: FirebaseOptions,
    auth: Arc<FirebaseAuth>,
}

impl FirebaseApp {
    pub fn new(options: FirebaseOptions) -> Self {
        let auth = Arc::new(FirebaseAuth::new(options.api_key.clone()));
        Self { options, auth }
    }

    pub fn options(&self) -> &FirebaseOptions {
        &self.options
    }

    pub fn auth(&self) -> Arc<FirebaseAuth> {
        Arc::clone(&self.auth)
    }

    pub fn database(&self) -> FirebaseDatabase {
        FirebaseDatabase::new(&self.options.database_url, Some(self.token_source()))
    }

    pub fn storage(&self) -> FirebaseStorage {
        FirebaseStorage::new(&self.options.storage_bucket, Some(self.token_source()))
    }

    pub fn remote_config(&self) -> Result<FirebaseRemoteConfig, remote_config::Error> {
        FirebaseRemoteConfig::new(
            &self.options.project_id,
            &self.options.api_key,
            &self.options.app_id,
        )
    }

    /// Builds the adapters the feed controller runs on, with the length limit
    /// default installed in Remote Config.
    pub async fn chat_adapters(&self, settings: &ChatSettings) -> Result<ChatAdapters, remote_config::Error> {
        let remote_config = self.remote_config()?;
        remote_config
            .set_defaults([(settings.length_limit_key.clone(), settings.default_length_limit)])
            .await;

        Ok(ChatAdapters {
            identity: self.auth(),
            store: Arc::new(FirebaseMessageStore::new(
                Arc::new(self.database()),
                settings.messages_path.clone(),
            )),
            blobs: Arc::new(FirebasePhotoStore::new(self.storage(), settings.photos_path.clone())),
            config: Arc::new(remote_config),
        })
    }

    fn token_source(&self) -> Arc<dyn TokenSource> {
        self.auth.clone()
    }
}
