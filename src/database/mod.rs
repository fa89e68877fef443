//! Firebase Realtime Database module.
//!
//! A REST client for the Realtime Database. Locations are addressed with
//! [`DatabaseReference`]s; new list children get client-generated push keys
//! (see [`push_id`]) so that their order matches the order they were created in.
//!
//! # Real-time Updates
//!
//! [`DatabaseReference::listen`] opens a streaming read
//! (`Accept: text/event-stream`) and returns an [`listen::EventStream`] of
//! `put` / `patch` / `keep-alive` / `cancel` / `auth_revoked` events.

pub mod listen;
pub mod models;
pub mod push_id;
pub mod reference;

#[cfg(test)]
mod tests;

use self::push_id::PushIdGenerator;
use self::reference::DatabaseReference;
use crate::core::build_client;
use crate::core::middleware::{AuthMiddleware, TokenPlacement, TokenSource};
use reqwest_middleware::ClientWithMiddleware;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can occur during Realtime Database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Errors returned by the Realtime Database REST API.
    #[error("API error: {0}")]
    ApiError(String),
    /// Wrapper for `serde_json::Error`.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// The server closed a streaming read.
    #[error("Stream closed: {0}")]
    StreamClosed(String),
}

/// Client for interacting with the Realtime Database.
pub struct FirebaseDatabase {
    client: ClientWithMiddleware,
    base_url: String,
    push_ids: Mutex<PushIdGenerator>,
}

impl FirebaseDatabase {
    /// Creates a client for the database at `database_url`
    /// (e.g. `https://my-project-default-rtdb.firebaseio.com`).
    ///
    /// When `auth` is given, each request carries the signed-in user's ID token as `?auth=`.
    pub fn new(database_url: &str, auth: Option<Arc<dyn TokenSource>>) -> Self {
        let middleware = auth.map(|source| AuthMiddleware::new(source, TokenPlacement::Query("auth")));
        Self::new_with_client(build_client(middleware), database_url)
    }

    /// Creates a client with a custom HTTP client (useful for testing and the emulator).
    pub fn new_with_client(client: ClientWithMiddleware, database_url: &str) -> Self {
        Self {
            client,
            base_url: database_url.trim_end_matches('/').to_string(),
            push_ids: Mutex::new(PushIdGenerator::new()),
        }
    }

    /// Gets a reference to the location at `path` (e.g. "messages").
    pub fn reference(&self, path: &str) -> DatabaseReference<'_> {
        DatabaseReference::new(self, path)
    }

    pub(crate) fn client(&self) -> &ClientWithMiddleware {
        &self.client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn next_push_key(&self) -> push_id::PushKey {
        self.push_ids
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .next_key()
    }
}
