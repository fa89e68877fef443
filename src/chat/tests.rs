use super::memory::{
    MemoryBlobStore, MemoryIdentity, MemoryMessageStore, MemoryRemoteConfig, RecordingView,
    ScriptedSignIn, SignInStep,
};
use super::*;
use crate::auth::SignInProvider;
use crate::config::ChatSettings;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    identity: Arc<MemoryIdentity>,
    store: Arc<MemoryMessageStore>,
    blobs: Arc<MemoryBlobStore>,
    config: Arc<MemoryRemoteConfig>,
    view: RecordingView,
    settings: ChatSettings,
}

impl Harness {
    fn new() -> Self {
        let settings = ChatSettings::default();
        Self {
            identity: Arc::new(MemoryIdentity::new()),
            store: Arc::new(MemoryMessageStore::new()),
            blobs: Arc::new(MemoryBlobStore::new("https://x")),
            config: Arc::new(MemoryRemoteConfig::new([(
                settings.length_limit_key.clone(),
                settings.default_length_limit as i64,
            )])),
            view: RecordingView::new(),
            settings,
        }
    }

    fn adapters(&self) -> ChatAdapters {
        ChatAdapters {
            identity: self.identity.clone(),
            store: self.store.clone(),
            blobs: self.blobs.clone(),
            config: self.config.clone(),
        }
    }

    fn controller(
        &self,
        steps: impl IntoIterator<Item = SignInStep>,
    ) -> (FeedController, Arc<ScriptedSignIn>) {
        let sign_in = Arc::new(ScriptedSignIn::new(self.identity.clone(), steps));
        let controller = FeedController::new(
            self.adapters(),
            sign_in.clone(),
            self.view.clone(),
            self.settings.clone(),
        );
        (controller, sign_in)
    }
}

fn alice() -> SignInStep {
    SignInStep::SignIn(Some("Alice".to_string()))
}

#[tokio::test]
async fn test_signed_in_user_sends_text() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice()]);

    controller.start().await.unwrap();
    assert!(controller.is_signed_in());
    assert_eq!(controller.username(), "Alice");

    controller.set_input("hello");
    assert!(controller.can_send());
    let delivery = controller.send_message().unwrap();
    assert_eq!(controller.composer().text(), "");
    delivery.wait().await.unwrap();

    assert_eq!(controller.drain_feed(), 1);
    let shown = h.view.messages();
    assert_eq!(shown, vec![Message::text("Alice", "hello")]);
    assert_eq!(
        serde_json::to_value(&shown[0]).unwrap(),
        json!({"text": "hello", "name": "Alice"})
    );
}

#[tokio::test]
async fn test_cancelled_sign_in_tears_down_the_view() {
    let h = Harness::new();
    let (mut controller, sign_in) = h.controller([SignInStep::Cancel]);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, ChatError::AuthCancelled));
    assert!(controller.is_terminated());
    assert!(h.view.is_closed());
    assert_eq!(h.store.subscriber_count(), 0);
    assert_eq!(
        sign_in.offered(),
        vec![vec![SignInProvider::Email, SignInProvider::google()]]
    );

    controller.set_input("hello");
    assert!(matches!(controller.send_message(), Err(ChatError::Terminated)));
    assert!(matches!(
        controller.sync_auth_state().await,
        Err(ChatError::Terminated)
    ));
}

#[tokio::test]
async fn test_photo_upload_posts_its_url() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();

    controller
        .send_photo(PickedPhoto::jpeg("/picker/cache/y.jpg"))
        .unwrap()
        .wait()
        .await
        .unwrap();
    controller.drain_feed();

    let shown = h.view.messages();
    assert_eq!(shown, vec![Message::photo("Alice", "https://x/y.jpg")]);
    assert_eq!(shown[0].as_text(), None);
    assert_eq!(
        serde_json::to_value(&shown[0]).unwrap(),
        json!({"name": "Alice", "photoUrl": "https://x/y.jpg"})
    );
    assert_eq!(h.blobs.uploads()[0].mime_type(), "image/jpeg");
}

#[tokio::test]
async fn test_subscribe_replays_prior_appends_in_order_before_live_ones() {
    let h = Harness::new();
    for i in 0..5 {
        h.store
            .append(&Message::text("Bob", format!("m{i}")))
            .await
            .unwrap();
    }

    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();
    assert_eq!(controller.drain_feed(), 5);

    h.store.append(&Message::text("Bob", "live")).await.unwrap();
    assert_eq!(controller.drain_feed(), 1);

    let log = h.view.log();
    let texts: Vec<_> = log
        .rendered
        .iter()
        .filter_map(|(_, m)| m.as_text().map(str::to_string))
        .collect();
    assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4", "live"]);

    let keys: Vec<_> = log.rendered.iter().map(|(k, _)| k.clone()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[tokio::test]
async fn test_resubscribe_after_sign_out_shows_the_full_feed_again() {
    let h = Harness::new();
    let (mut controller, sign_in) = h.controller([alice(), alice()]);
    controller.start().await.unwrap();

    for text in ["one", "two"] {
        controller.set_input(text);
        controller.send_message().unwrap().wait().await.unwrap();
    }
    controller.drain_feed();
    assert_eq!(h.view.messages().len(), 2);

    controller.sign_out().await.unwrap();
    controller.sync_auth_state().await.unwrap();

    assert!(controller.is_signed_in());
    assert_eq!(h.store.subscriber_count(), 1);
    assert_eq!(sign_in.offered().len(), 2);
    assert_eq!(h.view.log().clears, 1);

    controller.drain_feed();
    assert_eq!(
        h.view.messages(),
        vec![Message::text("Alice", "one"), Message::text("Alice", "two")]
    );
}

#[tokio::test]
async fn test_sign_out_resets_the_user_and_clears_the_feed() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice(), SignInStep::Cancel]);
    controller.start().await.unwrap();
    controller.set_input("hi");
    controller.send_message().unwrap().wait().await.unwrap();
    controller.drain_feed();

    controller.sign_out().await.unwrap();

    assert!(!controller.is_signed_in());
    assert_eq!(controller.username(), ANONYMOUS);
    assert!(h.view.messages().is_empty());
    assert_eq!(h.view.log().clears, 1);
    assert_eq!(h.store.subscriber_count(), 0);
    controller.set_input("after");
    assert!(!controller.can_send());
    assert!(matches!(controller.send_message(), Err(ChatError::NotSignedIn)));
    assert_eq!(h.store.messages().len(), 1);

    let err = controller.sync_auth_state().await.unwrap_err();
    assert!(matches!(err, ChatError::AuthCancelled));
    assert_eq!(h.view.log().clears, 1);
}

#[tokio::test]
async fn test_length_limit_truncates_input_and_exact_limit_sends() {
    let h = Harness::new();
    h.config.publish("friendly_msg_length", 5);
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();

    assert_eq!(controller.composer().limit(), 5);
    assert!(controller.set_input("hello world"));
    assert_eq!(controller.composer().text(), "hello");

    controller.send_message().unwrap().wait().await.unwrap();
    assert_eq!(
        h.store.messages()[0].1,
        Message::text("Alice", "hello")
    );
}

#[tokio::test]
async fn test_failed_config_fetch_keeps_the_default_limit() {
    let h = Harness::new();
    h.config.set_failing(true);
    h.config.publish("friendly_msg_length", 3);
    let (mut controller, _) = h.controller([alice()]);

    controller.start().await.unwrap();
    assert_eq!(controller.composer().limit(), 10);
}

#[tokio::test]
async fn test_failed_config_fetch_keeps_the_last_known_good_limit() {
    let mut h = Harness::new();
    h.settings.config_cache_expiration_secs = 0;
    h.config.publish("friendly_msg_length", 7);
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();
    assert_eq!(controller.composer().limit(), 7);

    h.config.set_failing(true);
    h.config.publish("friendly_msg_length", 3);
    controller.refresh_length_limit().await;

    assert_eq!(controller.composer().limit(), 7);
    assert_eq!(h.config.requests(), 2);
}

#[tokio::test]
async fn test_config_fetch_is_served_from_cache_within_the_interval() {
    let h = Harness::new();
    h.config.publish("friendly_msg_length", 20);
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();

    h.config.publish("friendly_msg_length", 30);
    controller.refresh_length_limit().await;

    assert_eq!(h.config.requests(), 1);
    assert_eq!(controller.composer().limit(), 20);
}

#[tokio::test]
async fn test_unusable_limit_falls_back_to_the_default() {
    let h = Harness::new();
    h.config.publish("friendly_msg_length", -3);
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();

    assert_eq!(controller.composer().limit(), 10);
}

#[tokio::test]
async fn test_send_requires_a_user_and_visible_text() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice()]);

    controller.set_input("early");
    assert!(!controller.can_send());
    assert!(matches!(controller.send_message(), Err(ChatError::NotSignedIn)));
    assert!(matches!(
        controller.send_photo(PickedPhoto::jpeg("/p/a.jpg")),
        Err(ChatError::NotSignedIn)
    ));

    controller.start().await.unwrap();
    controller.set_input("   ");
    assert!(matches!(controller.send_message(), Err(ChatError::EmptyMessage)));
    assert!(h.store.messages().is_empty());
}

#[tokio::test]
async fn test_write_failure_is_reported_and_input_still_cleared() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();
    h.store.set_fail_writes(true);

    controller.set_input("lost");
    let delivery = controller.send_message().unwrap();
    assert_eq!(controller.composer().text(), "");

    let err = delivery.wait().await.unwrap_err();
    assert!(matches!(err, ChatError::Store(StoreError::Unavailable(_))));
    assert!(h.store.messages().is_empty());
}

#[tokio::test]
async fn test_upload_failure_appends_nothing() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();
    h.blobs.set_fail(true);

    let err = controller
        .send_photo(PickedPhoto::jpeg("/p/y.jpg"))
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Upload(_)));
    assert!(h.store.messages().is_empty());
}

#[tokio::test]
async fn test_missing_display_name_posts_as_anonymous() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([SignInStep::SignIn(None)]);
    controller.start().await.unwrap();

    let session = controller.session().unwrap();
    assert_eq!(session.display_name(), ANONYMOUS);
    assert!(session.is_anonymous_fallback());

    controller.set_input("hi");
    controller.send_message().unwrap().wait().await.unwrap();
    assert_eq!(h.store.messages()[0].1.name(), ANONYMOUS);
}

#[tokio::test]
async fn test_user_change_while_signed_in_keeps_one_subscription() {
    let h = Harness::new();
    let (mut controller, _) = h.controller([alice()]);
    controller.start().await.unwrap();

    h.identity.sign_in(Some("Bob"));
    controller.sync_auth_state().await.unwrap();

    assert_eq!(controller.username(), "Bob");
    assert_eq!(h.store.subscriber_count(), 1);
}

#[tokio::test]
async fn test_closure_view_renders_messages() {
    let h = Harness::new();
    h.identity.sign_in(Some("Alice"));
    h.store.append(&Message::text("Bob", "hey")).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sign_in = ScriptedSignIn::new(h.identity.clone(), []);
    let mut controller = FeedController::new(
        h.adapters(),
        sign_in,
        move |_: &PushKey, message: &Message| sink.lock().unwrap().push(message.name().to_string()),
        h.settings.clone(),
    );

    controller.start().await.unwrap();
    controller.drain_feed();
    assert_eq!(*seen.lock().unwrap(), vec!["Bob".to_string()]);
}

#[tokio::test]
async fn test_run_loop_sends_renders_and_shuts_down() {
    let h = Harness::new();
    h.identity.sign_in(Some("Alice"));
    let (controller, _) = h.controller([]);
    let (commands, rx) = mpsc::channel(8);
    let running = tokio::spawn(controller.run(rx));

    commands.send(Command::Input("hello".to_string())).await.unwrap();
    commands.send(Command::Send).await.unwrap();

    let view = h.view.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while view.messages().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    commands.send(Command::Shutdown).await.unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(h.view.messages(), vec![Message::text("Alice", "hello")]);
    assert!(h.view.is_closed());
    assert_eq!(h.store.subscriber_count(), 0);
}

#[tokio::test]
async fn test_run_loop_follows_sign_out() {
    let h = Harness::new();
    h.identity.sign_in(Some("Alice"));
    let (controller, sign_in) = h.controller([SignInStep::Cancel]);
    let (commands, rx) = mpsc::channel(8);
    let running = tokio::spawn(controller.run(rx));

    commands.send(Command::SignOut).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(ChatError::AuthCancelled)));
    assert_eq!(sign_in.offered().len(), 1);
    assert!(h.view.is_closed());
    assert_eq!(h.store.subscriber_count(), 0);
}
