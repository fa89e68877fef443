//! Adapters backed by the Firebase REST clients.

use super::{
    BlobError, BlobStore, ConfigFetchError, FeedSubscription, FetchStatus, IdentityError,
    IdentityProvider, MessageStore, PickedPhoto, RemoteConfigSource, StoreError,
    SubscriptionHandle,
};
use crate::auth::{AuthState, FirebaseAuth, SignedInUser};
use crate::chat::message::{FeedEvent, Message, PushKey};
use crate::database::listen::EventStream;
use crate::database::models::{EventPayload, StreamEvent};
use crate::database::{DatabaseError, FirebaseDatabase};
use crate::remote_config::FirebaseRemoteConfig;
use crate::storage::FirebaseStorage;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

#[async_trait::async_trait]
impl IdentityProvider for FirebaseAuth {
    fn auth_state(&self) -> watch::Receiver<AuthState> {
        FirebaseAuth::auth_state(self)
    }

    async fn current_user(&self) -> Option<SignedInUser> {
        FirebaseAuth::current_user(self).await
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        FirebaseAuth::sign_out(self).await;
        Ok(())
    }
}

/// The chat feed stored as a list of push-keyed children of one database location.
pub struct FirebaseMessageStore {
    db: Arc<FirebaseDatabase>,
    path: String,
    subscriptions: Registry,
    next_id: AtomicU64,
}

type Registry = Arc<Mutex<HashMap<u64, AbortHandle>>>;

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<u64, AbortHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FirebaseMessageStore {
    pub fn new(db: Arc<FirebaseDatabase>, path: impl Into<String>) -> Self {
        Self {
            db,
            path: path.into(),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscriptions whose stream is still being forwarded.
    pub fn live_subscriptions(&self) -> usize {
        lock(&self.subscriptions).len()
    }
}

#[async_trait::async_trait]
impl MessageStore for FirebaseMessageStore {
    async fn append(&self, message: &Message) -> Result<PushKey, StoreError> {
        let (key, child) = self.db.reference(&self.path).push();
        child.set(message).await?;
        debug!(%key, path = %self.path, "message appended");
        Ok(key)
    }

    async fn subscribe(&self) -> Result<FeedSubscription, StoreError> {
        let stream = self.db.reference(&self.path).listen().await?;
        let (tx, events) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let feed = ForwardedFeed {
            db: Arc::clone(&self.db),
            path: self.path.clone(),
            id,
            registry: Arc::clone(&self.subscriptions),
        };
        // Registered under the lock so a stream that ends at once cannot leave an entry behind.
        let mut registry = lock(&self.subscriptions);
        let task = tokio::spawn(feed.run(stream, tx));
        registry.insert(id, task.abort_handle());
        drop(registry);
        debug!(subscription = id, path = %self.path, "feed subscribed");

        Ok(FeedSubscription {
            handle: SubscriptionHandle(id),
            events,
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(task) = lock(&self.subscriptions).remove(&handle.0) {
            task.abort();
            debug!(subscription = handle.0, "feed unsubscribed");
        }
    }
}

/// Consecutive credential revocations tolerated without any data in between.
const MAX_RELISTENS: u32 = 3;

struct ForwardedFeed {
    db: Arc<FirebaseDatabase>,
    path: String,
    id: u64,
    registry: Registry,
}

impl ForwardedFeed {
    async fn run(self, stream: EventStream, tx: mpsc::UnboundedSender<FeedEvent>) {
        let reason = self.forward(stream, &tx).await;
        lock(&self.registry).remove(&self.id);
        if let Some(reason) = reason {
            warn!(subscription = self.id, %reason, "feed stream closed");
            let _ = tx.send(FeedEvent::Closed { reason });
        }
    }

    // Returns why the feed ended, or `None` when the subscriber went away.
    async fn forward(&self, mut stream: EventStream, tx: &mpsc::UnboundedSender<FeedEvent>) -> Option<String> {
        let mut decoder = FeedDecoder::default();
        let mut relistens = 0;

        loop {
            let event = match stream.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Some(e.to_string()),
                None => {
                    let closed = DatabaseError::StreamClosed("the server ended the event stream".to_string());
                    return Some(closed.to_string());
                }
            };

            match event {
                // Sent when the ID token in the listen URL expires; listening again picks up a fresh one.
                StreamEvent::AuthRevoked(reason) if relistens < MAX_RELISTENS => {
                    relistens += 1;
                    debug!(
                        subscription = self.id,
                        reason = reason.trim_matches('"'),
                        "credential revoked, listening again"
                    );
                    match self.db.reference(&self.path).listen().await {
                        Ok(next) => stream = next,
                        Err(e) => return Some(e.to_string()),
                    }
                }
                StreamEvent::KeepAlive => {}
                event => {
                    relistens = 0;
                    match decoder.decode(event) {
                        Ok(events) => {
                            for event in events {
                                if tx.send(event).is_err() {
                                    return None;
                                }
                            }
                        }
                        Err(e) => return Some(e.to_string()),
                    }
                }
            }
        }
    }
}

/// Turns raw stream events into feed add-events.
///
/// Only children that have not been delivered yet count as additions. Changes to
/// known children, removals and writes below a child are ignored.
#[derive(Debug, Default)]
pub(crate) struct FeedDecoder {
    seen: HashSet<PushKey>,
}

impl FeedDecoder {
    pub(crate) fn decode(&mut self, event: StreamEvent) -> Result<Vec<FeedEvent>, DatabaseError> {
        match event {
            StreamEvent::Put(payload) => Ok(self.put(payload)),
            StreamEvent::Patch(payload) => Ok(self.patch(payload)),
            StreamEvent::KeepAlive => Ok(Vec::new()),
            StreamEvent::Cancel(reason) => Err(DatabaseError::StreamClosed(format!(
                "listen cancelled: {}",
                reason.trim_matches('"')
            ))),
            StreamEvent::AuthRevoked(reason) => Err(DatabaseError::StreamClosed(format!(
                "credential revoked: {}",
                reason.trim_matches('"')
            ))),
        }
    }

    fn put(&mut self, payload: EventPayload) -> Vec<FeedEvent> {
        match payload.path.trim_matches('/') {
            "" => self.children(payload.data),
            key if !key.contains('/') => self.child(key, payload.data).into_iter().collect(),
            path => {
                debug!(path, "ignoring write below a message");
                Vec::new()
            }
        }
    }

    fn patch(&mut self, payload: EventPayload) -> Vec<FeedEvent> {
        if payload.path.trim_matches('/').is_empty() {
            self.children(payload.data)
        } else {
            debug!(path = %payload.path, "ignoring update of a message");
            Vec::new()
        }
    }

    fn children(&mut self, data: Value) -> Vec<FeedEvent> {
        match data {
            Value::Object(entries) => entries
                .into_iter()
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .filter_map(|(key, value)| self.child(&key, value))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                warn!(value = %other, "feed location does not hold a list of messages");
                Vec::new()
            }
        }
    }

    fn child(&mut self, key: &str, value: Value) -> Option<FeedEvent> {
        if key.contains('/') {
            debug!(path = key, "ignoring write below a message");
            return None;
        }
        let key = PushKey::new(key);
        if value.is_null() {
            debug!(%key, "ignoring removed message");
            return None;
        }
        if self.seen.contains(&key) {
            debug!(%key, "ignoring change to a delivered message");
            return None;
        }
        match serde_json::from_value::<Message>(value) {
            Ok(message) => {
                self.seen.insert(key.clone());
                Some(FeedEvent::Added { key, message })
            }
            Err(e) => {
                warn!(%key, error = %e, "skipping malformed message");
                None
            }
        }
    }
}

/// Uploads picked photos into one folder of the default bucket.
pub struct FirebasePhotoStore {
    storage: FirebaseStorage,
    folder: String,
}

impl FirebasePhotoStore {
    pub fn new(storage: FirebaseStorage, folder: impl Into<String>) -> Self {
        Self {
            storage,
            folder: folder.into(),
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for FirebasePhotoStore {
    async fn upload(&self, photo: &PickedPhoto) -> Result<String, BlobError> {
        let object = format!("{}/{}", self.folder.trim_end_matches('/'), photo.file_name()?);
        let bytes = tokio::fs::read(photo.path()).await?;

        let file = self.storage.bucket(None).file(&object);
        let metadata = file.save(bytes, photo.mime_type()).await?;
        let url = file.download_url(&metadata).await?;
        debug!(object = file.name(), "photo uploaded");
        Ok(url)
    }
}

#[async_trait::async_trait]
impl RemoteConfigSource for FirebaseRemoteConfig {
    async fn fetch(&self, max_age: Duration) -> Result<FetchStatus, ConfigFetchError> {
        Ok(self.fetch_with_max_age(max_age).await?)
    }

    async fn activate(&self) -> bool {
        FirebaseRemoteConfig::activate(self).await
    }

    async fn get_i64(&self, key: &str) -> i64 {
        FirebaseRemoteConfig::get_i64(self, key).await
    }
}
