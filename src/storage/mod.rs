//! Cloud Storage for Firebase module.
//!
//! Uploads files to the project's default bucket through the Firebase Storage REST
//! API and resolves the token-protected download URL that other chat users load
//! photos from.
//!
//! # Examples
//!
//! ```rust,ignore
//! # use friendlychat::storage::FirebaseStorage;
//! # async fn run(storage: FirebaseStorage) {
//! let file = storage.bucket(None).file("chat_photos/cat.jpg");
//! let metadata = file.save(std::fs::read("cat.jpg").unwrap(), "image/jpeg").await.unwrap();
//! let url = file.download_url(&metadata).await.unwrap();
//! # }
//! ```

pub mod bucket;
pub mod file;

use crate::core::build_client;
use crate::core::middleware::{AuthMiddleware, TokenPlacement, TokenSource};
use bucket::Bucket;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use thiserror::Error;

const STORAGE_V0_API: &str = "https://firebasestorage.googleapis.com/v0";

/// Errors that can occur during Storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Storage API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The object URL could not be built from the configured base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// The object has no download token, so no public URL can be built.
    #[error("Object {0} has no download token")]
    MissingDownloadToken(String),
}

/// Client for interacting with Cloud Storage for Firebase.
#[derive(Clone)]
pub struct FirebaseStorage {
    client: ClientWithMiddleware,
    base_url: String,
    default_bucket: String,
}

impl FirebaseStorage {
    /// Creates a client for `default_bucket` (e.g. "my-project.appspot.com").
    ///
    /// When `auth` is given, requests carry `Authorization: Firebase <idToken>`.
    pub fn new(default_bucket: &str, auth: Option<Arc<dyn TokenSource>>) -> Self {
        let middleware = auth.map(|source| AuthMiddleware::new(source, TokenPlacement::Header("Firebase")));
        Self::new_with_client(build_client(middleware), STORAGE_V0_API, default_bucket)
    }

    /// Creates a client with a custom HTTP client and base URL (useful for testing and the emulator).
    pub fn new_with_client(client: ClientWithMiddleware, base_url: &str, default_bucket: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_bucket: default_bucket.to_string(),
        }
    }

    /// Gets a `Bucket` instance, or the project's default bucket when `name` is `None`.
    pub fn bucket(&self, name: Option<&str>) -> Bucket {
        let bucket_name = name.unwrap_or(&self.default_bucket).to_string();
        Bucket::new(self.client.clone(), self.base_url.clone(), bucket_name)
    }
}
