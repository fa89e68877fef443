//! Narrow capability contracts the feed controller talks to.
//!
//! Each trait wraps one external service. [`firebase`] implements them over the
//! Firebase REST clients; [`crate::chat::memory`] implements them in-process.

pub mod firebase;

use super::message::{FeedEvent, Message, PushKey};
use crate::auth::{AuthError, AuthState, SignInProvider, SignedInUser};
use crate::database::DatabaseError;
use crate::remote_config;
pub use crate::remote_config::FetchStatus;
use crate::storage::StorageError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to read picked file: {0}")]
    Io(#[from] std::io::Error),
    #[error("picked file has no usable name: {0}")]
    InvalidFile(String),
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ConfigFetchError {
    #[error(transparent)]
    RemoteConfig(#[from] remote_config::Error),
    #[error("remote config unavailable: {0}")]
    Unavailable(String),
}

/// Result of the sign-in flow presented while signed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInOutcome {
    /// The provider finished; the identity provider publishes the new state.
    Completed,
    /// The user backed out. Not retryable.
    Cancelled,
}

/// Exposes the signed-in user and an observable auth state.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    fn auth_state(&self) -> watch::Receiver<AuthState>;

    async fn current_user(&self) -> Option<SignedInUser>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// The sign-in screen: offers the given providers and resolves once the user is done.
#[async_trait::async_trait]
pub trait SignInFlow: Send + Sync {
    async fn present(&self, providers: &[SignInProvider]) -> SignInOutcome;
}

#[async_trait::async_trait]
impl<T: SignInFlow + ?Sized> SignInFlow for std::sync::Arc<T> {
    async fn present(&self, providers: &[SignInProvider]) -> SignInOutcome {
        (**self).present(providers).await
    }
}

/// Identifies one live feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A live subscription: add-events arrive on `events` in key order, oldest first.
#[derive(Debug)]
pub struct FeedSubscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::UnboundedReceiver<FeedEvent>,
}

/// Append-only, ordered message feed.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Writes `message` under a freshly generated push key.
    async fn append(&self, message: &Message) -> Result<PushKey, StoreError>;

    /// Starts delivering the existing feed followed by live appends.
    async fn subscribe(&self) -> Result<FeedSubscription, StoreError>;

    /// Stops delivery for `handle`. Unknown or already-cancelled handles are ignored.
    async fn unsubscribe(&self, handle: &SubscriptionHandle);
}

/// A local file returned by the photo picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedPhoto {
    path: PathBuf,
    mime_type: String,
}

impl PickedPhoto {
    pub const JPEG: &'static str = "image/jpeg";

    pub fn new(path: impl Into<PathBuf>, mime_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn jpeg(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Self::JPEG)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The last path segment, used as the object name in the photo folder.
    pub fn file_name(&self) -> Result<&str, BlobError> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| BlobError::InvalidFile(self.path.display().to_string()))
    }
}

/// Uploads picked photos and hands back a URL anyone in the chat can load.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, photo: &PickedPhoto) -> Result<String, BlobError>;
}

/// A small key-value bundle with in-app defaults.
#[async_trait::async_trait]
pub trait RemoteConfigSource: Send + Sync {
    /// Fetches values unless the last successful fetch is younger than `max_age`.
    async fn fetch(&self, max_age: Duration) -> Result<FetchStatus, ConfigFetchError>;

    /// Promotes fetched values to active. Returns `false` when there was nothing to activate.
    async fn activate(&self) -> bool;

    /// Reads an integer from the active values, then the defaults, then `0`.
    async fn get_i64(&self, key: &str) -> i64;
}

/// Renders the feed.
pub trait FeedView: Send {
    fn render(&mut self, key: &PushKey, message: &Message);

    /// Drops everything rendered so far.
    fn clear(&mut self) {}

    /// Tears the view down; nothing is rendered afterwards.
    fn close(&mut self) {}
}

impl<F> FeedView for F
where
    F: FnMut(&PushKey, &Message) + Send,
{
    fn render(&mut self, key: &PushKey, message: &Message) {
        self(key, message)
    }
}
