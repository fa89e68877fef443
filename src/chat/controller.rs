use super::adapters::{
    BlobError, BlobStore, FeedSubscription, FeedView, IdentityError, IdentityProvider,
    MessageStore, PickedPhoto, RemoteConfigSource, SignInFlow, SignInOutcome, StoreError,
    SubscriptionHandle,
};
use super::composer::MessageComposer;
use super::message::{FeedEvent, Message, PushKey, ANONYMOUS};
use crate::auth::{AuthState, SignedInUser};
use crate::config::ChatSettings;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ChatError {
    /// The user backed out of sign-in. The view has been torn down.
    #[error("sign-in was cancelled")]
    AuthCancelled,
    #[error("the chat has been torn down")]
    Terminated,
    #[error("no user is signed in")]
    NotSignedIn,
    #[error("nothing to send")]
    EmptyMessage,
    #[error("message store error: {0}")]
    Store(#[from] StoreError),
    #[error("photo upload failed: {0}")]
    Upload(#[from] BlobError),
    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),
    #[error("delivery task failed: {0}")]
    Task(#[from] JoinError),
}

/// Process-wide service handles, built once at startup.
#[derive(Clone)]
pub struct ChatAdapters {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn MessageStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Arc<dyn RemoteConfigSource>,
}

/// Host input for [`FeedController::run`].
#[derive(Debug, Clone)]
pub enum Command {
    /// The input field changed.
    Input(String),
    Send,
    SendPhoto(PickedPhoto),
    SignOut,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// Who is posting while the feed is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    display_name: String,
    anonymous_fallback: bool,
}

impl Session {
    fn for_user(user: &SignedInUser) -> Self {
        match user.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => Self {
                display_name: name.to_string(),
                anonymous_fallback: false,
            },
            None => Self {
                display_name: ANONYMOUS.to_string(),
                anonymous_fallback: true,
            },
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// `true` when the provider gave no display name.
    pub fn is_anonymous_fallback(&self) -> bool {
        self.anonymous_fallback
    }
}

/// An append or upload running in the background.
///
/// Dropping it leaves the work running; [`Delivery::wait`] yields its outcome.
/// Failures are logged either way.
#[derive(Debug)]
pub struct Delivery {
    task: JoinHandle<Result<PushKey, ChatError>>,
}

impl Delivery {
    pub async fn wait(self) -> Result<PushKey, ChatError> {
        self.task.await?
    }
}

struct ActiveFeed {
    session: Session,
    handle: SubscriptionHandle,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    closed: bool,
}

enum Phase {
    SignedOut,
    SignedIn(ActiveFeed),
    Terminated,
}

/// Keeps the feed subscription in step with the auth state and sends what the user types.
///
/// At most one subscription is live, and only while a user is signed in.
pub struct FeedController {
    adapters: ChatAdapters,
    sign_in: Box<dyn SignInFlow>,
    view: Box<dyn FeedView>,
    settings: ChatSettings,
    composer: MessageComposer,
    auth: watch::Receiver<AuthState>,
    phase: Phase,
}

impl FeedController {
    pub fn new(
        adapters: ChatAdapters,
        sign_in: impl SignInFlow + 'static,
        view: impl FeedView + 'static,
        settings: ChatSettings,
    ) -> Self {
        let auth = adapters.identity.auth_state();
        let composer = MessageComposer::new(settings.default_length_limit);
        Self {
            adapters,
            sign_in: Box::new(sign_in),
            view: Box::new(view),
            settings,
            composer,
            auth,
            phase: Phase::SignedOut,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self.phase, Phase::SignedIn(_))
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated)
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.phase {
            Phase::SignedIn(feed) => Some(&feed.session),
            _ => None,
        }
    }

    /// The name messages are posted under.
    pub fn username(&self) -> &str {
        self.session().map_or(ANONYMOUS, Session::display_name)
    }

    pub fn composer(&self) -> &MessageComposer {
        &self.composer
    }

    /// Whether the send control is enabled.
    pub fn can_send(&self) -> bool {
        self.is_signed_in() && self.composer.can_send()
    }

    /// Refreshes the length limit, then reacts to the current auth state.
    pub async fn start(&mut self) -> Result<(), ChatError> {
        self.refresh_length_limit().await;
        self.sync_auth_state().await
    }

    /// Applies the latest published auth state.
    pub async fn sync_auth_state(&mut self) -> Result<(), ChatError> {
        let state = self.auth.borrow_and_update().clone();
        self.on_auth_state(state).await
    }

    pub async fn on_auth_state(&mut self, state: AuthState) -> Result<(), ChatError> {
        if self.is_terminated() {
            return Err(ChatError::Terminated);
        }

        match state {
            AuthState::SignedIn(user) => self.activate(&user).await,
            AuthState::SignedOut => {
                self.deactivate().await;
                let outcome = self.sign_in.present(&self.settings.sign_in_providers).await;
                match outcome {
                    SignInOutcome::Completed => {
                        let state = self.auth.borrow_and_update().clone();
                        match state {
                            AuthState::SignedIn(user) => self.activate(&user).await,
                            AuthState::SignedOut => Ok(()),
                        }
                    }
                    SignInOutcome::Cancelled => {
                        info!("sign-in cancelled, closing the chat");
                        self.terminate().await;
                        Err(ChatError::AuthCancelled)
                    }
                }
            }
        }
    }

    async fn activate(&mut self, user: &SignedInUser) -> Result<(), ChatError> {
        let session = Session::for_user(user);
        if let Phase::SignedIn(feed) = &mut self.phase {
            debug!(name = %session.display_name, "signed-in user changed, keeping the feed");
            feed.session = session;
            return Ok(());
        }

        let FeedSubscription { handle, events } = self.adapters.store.subscribe().await?;
        info!(name = %session.display_name, subscription = handle.id(), "feed activated");
        self.phase = Phase::SignedIn(ActiveFeed {
            session,
            handle,
            events,
            closed: false,
        });
        Ok(())
    }

    async fn deactivate(&mut self) {
        if let Phase::SignedIn(feed) = std::mem::replace(&mut self.phase, Phase::SignedOut) {
            self.adapters.store.unsubscribe(&feed.handle).await;
            info!(subscription = feed.handle.id(), "feed deactivated");
            self.view.clear();
        }
    }

    async fn terminate(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Terminated) {
            Phase::Terminated => return,
            Phase::SignedIn(feed) => self.adapters.store.unsubscribe(&feed.handle).await,
            Phase::SignedOut => {}
        }
        self.view.close();
    }

    /// Signs out and drops the feed right away. The sign-in flow is presented once
    /// the identity provider publishes the signed-out state.
    pub async fn sign_out(&mut self) -> Result<(), ChatError> {
        if self.is_terminated() {
            return Err(ChatError::Terminated);
        }
        self.adapters.identity.sign_out().await?;
        self.deactivate().await;
        Ok(())
    }

    /// Feeds the input field through the length filter. Returns `true` if it was cut.
    pub fn set_input(&mut self, text: &str) -> bool {
        self.composer.set_text(text)
    }

    /// Posts the typed text and clears the input.
    pub fn send_message(&mut self) -> Result<Delivery, ChatError> {
        let name = self.posting_name()?;
        if !self.composer.can_send() {
            return Err(ChatError::EmptyMessage);
        }

        let message = Message::text(name, self.composer.take());
        let store = Arc::clone(&self.adapters.store);
        Ok(spawn_delivery("message", async move {
            Ok::<_, ChatError>(store.append(&message).await?)
        }))
    }

    /// Uploads a picked photo, then posts its URL.
    pub fn send_photo(&mut self, photo: PickedPhoto) -> Result<Delivery, ChatError> {
        let name = self.posting_name()?;
        let store = Arc::clone(&self.adapters.store);
        let blobs = Arc::clone(&self.adapters.blobs);
        Ok(spawn_delivery("photo", async move {
            let url = blobs.upload(&photo).await?;
            Ok::<_, ChatError>(store.append(&Message::photo(name, url)).await?)
        }))
    }

    fn posting_name(&self) -> Result<String, ChatError> {
        match &self.phase {
            Phase::SignedIn(feed) => Ok(feed.session.display_name.clone()),
            Phase::SignedOut => Err(ChatError::NotSignedIn),
            Phase::Terminated => Err(ChatError::Terminated),
        }
    }

    /// Fetches the length limit and applies it to the composer.
    ///
    /// A failed fetch keeps the last activated value, or the default on first run.
    pub async fn refresh_length_limit(&mut self) {
        let config = &self.adapters.config;
        let max_age = Duration::from_secs(self.settings.config_cache_expiration_secs);
        match config.fetch(max_age).await {
            Ok(status) => {
                let activated = config.activate().await;
                debug!(?status, activated, "remote config fetched");
            }
            Err(e) => warn!(error = %e, "remote config fetch failed, keeping the last known values"),
        }

        let key = &self.settings.length_limit_key;
        let value = config.get_i64(key).await;
        let limit = match usize::try_from(value).ok().filter(|&l| l > 0) {
            Some(limit) => limit,
            None => {
                warn!(key = %key, value, "unusable length limit, using the default");
                self.settings.default_length_limit
            }
        };
        self.composer.set_limit(limit);
        debug!(limit, "message length limit applied");
    }

    /// Renders every feed event that has already arrived. Returns how many messages were rendered.
    pub fn drain_feed(&mut self) -> usize {
        let Phase::SignedIn(feed) = &mut self.phase else {
            return 0;
        };

        let mut rendered = 0;
        while !feed.closed {
            match feed.events.try_recv() {
                Ok(event) => {
                    if apply_feed_event(&mut *self.view, feed, event) {
                        rendered += 1;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => feed.closed = true,
            }
        }
        rendered
    }

    /// Drives the controller until the host shuts it down, the command channel
    /// closes, or sign-in is cancelled.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<(), ChatError> {
        let result = self.event_loop(&mut commands).await;
        self.teardown().await;
        result
    }

    async fn event_loop(&mut self, commands: &mut mpsc::Receiver<Command>) -> Result<(), ChatError> {
        self.start().await?;

        loop {
            tokio::select! {
                changed = self.auth.changed() => {
                    if changed.is_err() {
                        warn!("identity provider dropped, stopping");
                        return Ok(());
                    }
                    let state = self.auth.borrow_and_update().clone();
                    self.on_auth_state(state).await?;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        return Ok(());
                    };
                    if self.handle(command).await? == Flow::Terminate {
                        return Ok(());
                    }
                }
                event = next_feed_event(&mut self.phase) => {
                    if let (Some(event), Phase::SignedIn(feed)) = (event, &mut self.phase) {
                        apply_feed_event(&mut *self.view, feed, event);
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Result<Flow, ChatError> {
        match command {
            Command::Input(text) => {
                self.set_input(&text);
            }
            Command::Send => match self.send_message() {
                Ok(_) => {}
                Err(ChatError::EmptyMessage) => debug!("ignoring send of empty input"),
                Err(e) => warn!(error = %e, "message not sent"),
            },
            Command::SendPhoto(photo) => {
                if let Err(e) = self.send_photo(photo) {
                    warn!(error = %e, "photo not sent");
                }
            }
            Command::SignOut => self.sign_out().await?,
            Command::Shutdown => return Ok(Flow::Terminate),
        }
        Ok(Flow::Continue)
    }

    /// Unsubscribes, closes the view and releases the adapters.
    pub async fn teardown(mut self) {
        self.terminate().await;
        debug!("chat torn down");
    }
}

fn spawn_delivery<F>(kind: &'static str, work: F) -> Delivery
where
    F: Future<Output = Result<PushKey, ChatError>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let result = work.await;
        match &result {
            Ok(key) => debug!(kind, %key, "delivered"),
            Err(e) => warn!(kind, error = %e, "delivery failed"),
        }
        result
    });
    Delivery { task }
}

// Returns whether a message was rendered.
fn apply_feed_event(view: &mut dyn FeedView, feed: &mut ActiveFeed, event: FeedEvent) -> bool {
    match event {
        FeedEvent::Added { key, message } => {
            view.render(&key, &message);
            true
        }
        FeedEvent::Closed { reason } => {
            warn!(%reason, "feed closed by the backend");
            feed.closed = true;
            false
        }
    }
}

async fn next_feed_event(phase: &mut Phase) -> Option<FeedEvent> {
    match phase {
        Phase::SignedIn(feed) if !feed.closed => {
            let event = feed.events.recv().await;
            if event.is_none() {
                feed.closed = true;
            }
            event
        }
        _ => std::future::pending().await,
    }
}
