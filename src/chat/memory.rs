//! In-process adapters.
//!
//! They keep everything in memory and expose switches for the failure paths, which
//! makes them suitable for exercising a [`FeedController`](super::FeedController)
//! without a Firebase project.

use super::adapters::{
    BlobError, BlobStore, ConfigFetchError, FeedSubscription, FeedView, FetchStatus,
    IdentityError, IdentityProvider, MessageStore, PickedPhoto, RemoteConfigSource, SignInFlow,
    SignInOutcome, StoreError, SubscriptionHandle,
};
use super::message::{FeedEvent, Message, PushKey};
use crate::auth::{AuthState, SignInProvider, SignedInUser};
use crate::database::push_id::PushIdGenerator;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity provider whose state is switched by hand.
pub struct MemoryIdentity {
    state: watch::Sender<AuthState>,
    next_uid: AtomicU64,
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        Self {
            state,
            next_uid: AtomicU64::new(1),
        }
    }

    /// Publishes a signed-in user with the given display name.
    pub fn sign_in(&self, display_name: Option<&str>) -> SignedInUser {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        let user = SignedInUser {
            uid: format!("user-{uid}"),
            display_name: display_name.map(str::to_string),
            email: None,
        };
        self.state.send_replace(AuthState::SignedIn(user.clone()));
        user
    }

    pub fn set_signed_out(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.is_signed_in();
            *state = AuthState::SignedOut;
            changed
        });
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MemoryIdentity {
    fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    async fn current_user(&self) -> Option<SignedInUser> {
        match &*self.state.borrow() {
            AuthState::SignedIn(user) => Some(user.clone()),
            AuthState::SignedOut => None,
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.set_signed_out();
        Ok(())
    }
}

/// One scripted reaction of [`ScriptedSignIn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInStep {
    /// Signs in on the identity with this display name.
    SignIn(Option<String>),
    Cancel,
}

/// A sign-in screen that plays back a fixed script. An exhausted script cancels.
pub struct ScriptedSignIn {
    identity: Arc<MemoryIdentity>,
    steps: Mutex<VecDeque<SignInStep>>,
    offered: Mutex<Vec<Vec<SignInProvider>>>,
}

impl ScriptedSignIn {
    pub fn new(identity: Arc<MemoryIdentity>, steps: impl IntoIterator<Item = SignInStep>) -> Self {
        Self {
            identity,
            steps: Mutex::new(steps.into_iter().collect()),
            offered: Mutex::new(Vec::new()),
        }
    }

    /// The provider lists shown so far, one entry per presentation.
    pub fn offered(&self) -> Vec<Vec<SignInProvider>> {
        lock(&self.offered).clone()
    }
}

#[async_trait::async_trait]
impl SignInFlow for ScriptedSignIn {
    async fn present(&self, providers: &[SignInProvider]) -> SignInOutcome {
        lock(&self.offered).push(providers.to_vec());
        let step = lock(&self.steps).pop_front();
        match step {
            Some(SignInStep::SignIn(name)) => {
                self.identity.sign_in(name.as_deref());
                SignInOutcome::Completed
            }
            Some(SignInStep::Cancel) | None => SignInOutcome::Cancelled,
        }
    }
}

/// A feed kept in a vector, fanned out to every live subscriber.
#[derive(Default)]
pub struct MemoryMessageStore {
    state: Mutex<StoreState>,
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct StoreState {
    messages: Vec<(PushKey, Message)>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<FeedEvent>>,
    push_ids: PushIdGenerator,
    next_id: u64,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following append fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(PushKey, Message)> {
        lock(&self.state).messages.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: &Message) -> Result<PushKey, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".to_string()));
        }

        let mut state = lock(&self.state);
        let key = state.push_ids.next_key();
        state.messages.push((key.clone(), message.clone()));
        state.subscribers.retain(|_, tx| {
            tx.send(FeedEvent::Added {
                key: key.clone(),
                message: message.clone(),
            })
            .is_ok()
        });
        Ok(key)
    }

    async fn subscribe(&self) -> Result<FeedSubscription, StoreError> {
        let mut state = lock(&self.state);
        let (tx, events) = mpsc::unbounded_channel();
        for (key, message) in &state.messages {
            let _ = tx.send(FeedEvent::Added {
                key: key.clone(),
                message: message.clone(),
            });
        }

        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(id, tx);
        Ok(FeedSubscription {
            handle: SubscriptionHandle(id),
            events,
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        lock(&self.state).subscribers.remove(&handle.0);
    }
}

/// Pretends to upload: the URL is `{base_url}/{file name}`.
pub struct MemoryBlobStore {
    base_url: String,
    fail: AtomicBool,
    uploads: Mutex<Vec<PickedPhoto>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            fail: AtomicBool::new(false),
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<PickedPhoto> {
        lock(&self.uploads).clone()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, photo: &PickedPhoto) -> Result<String, BlobError> {
        lock(&self.uploads).push(photo.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("uploads are disabled".to_string()));
        }
        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), photo.file_name()?))
    }
}

/// Remote config whose backend values are set with [`MemoryRemoteConfig::publish`].
pub struct MemoryRemoteConfig {
    state: Mutex<ConfigState>,
}

#[derive(Default)]
struct ConfigState {
    defaults: HashMap<String, i64>,
    published: HashMap<String, i64>,
    fetched: Option<HashMap<String, i64>>,
    active: HashMap<String, i64>,
    last_fetch: Option<Instant>,
    failing: bool,
    requests: usize,
}

impl MemoryRemoteConfig {
    pub fn new<K: Into<String>>(defaults: impl IntoIterator<Item = (K, i64)>) -> Self {
        Self {
            state: Mutex::new(ConfigState {
                defaults: defaults.into_iter().map(|(k, v)| (k.into(), v)).collect(),
                ..Default::default()
            }),
        }
    }

    /// Sets a value on the simulated backend; visible after the next fetch and activate.
    pub fn publish(&self, key: impl Into<String>, value: i64) {
        lock(&self.state).published.insert(key.into(), value);
    }

    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Fetches that went past the cache.
    pub fn requests(&self) -> usize {
        lock(&self.state).requests
    }
}

#[async_trait::async_trait]
impl RemoteConfigSource for MemoryRemoteConfig {
    async fn fetch(&self, max_age: Duration) -> Result<FetchStatus, ConfigFetchError> {
        let mut state = lock(&self.state);
        if state.last_fetch.is_some_and(|at| at.elapsed() < max_age) {
            return Ok(FetchStatus::Cached);
        }

        state.requests += 1;
        if state.failing {
            return Err(ConfigFetchError::Unavailable("backend unreachable".to_string()));
        }
        state.fetched = Some(state.published.clone());
        state.last_fetch = Some(Instant::now());
        Ok(FetchStatus::Fetched)
    }

    async fn activate(&self) -> bool {
        let mut state = lock(&self.state);
        match state.fetched.take() {
            Some(fetched) => {
                state.active = fetched;
                true
            }
            None => false,
        }
    }

    async fn get_i64(&self, key: &str) -> i64 {
        let state = lock(&self.state);
        state
            .active
            .get(key)
            .or_else(|| state.defaults.get(key))
            .copied()
            .unwrap_or(0)
    }
}

/// What a [`RecordingView`] has been asked to do.
#[derive(Debug, Default, Clone)]
pub struct ViewLog {
    pub rendered: Vec<(PushKey, Message)>,
    pub clears: usize,
    pub closed: bool,
}

/// A view that records every call; clones share one log.
#[derive(Debug, Default, Clone)]
pub struct RecordingView {
    log: Arc<Mutex<ViewLog>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> ViewLog {
        lock(&self.log).clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.log)
            .rendered
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.log).closed
    }
}

impl FeedView for RecordingView {
    fn render(&mut self, key: &PushKey, message: &Message) {
        lock(&self.log).rendered.push((key.clone(), message.clone()));
    }

    fn clear(&mut self) {
        let mut log = lock(&self.log);
        log.rendered.clear();
        log.clears += 1;
    }

    fn close(&mut self) {
        lock(&self.log).closed = true;
    }
}
