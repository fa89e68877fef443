use super::*;
use crate::core::middleware::{AuthMiddleware, TokenPlacement, TokenSource};
use futures::StreamExt;
use httpmock::prelude::*;
use models::{EventPayload, StreamEvent};
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde_json::json;

struct StaticToken(Option<&'static str>);

#[async_trait::async_trait]
impl TokenSource for StaticToken {
    async fn id_token(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(self.0.map(str::to_string))
    }
}

struct BrokenToken;

#[async_trait::async_trait]
impl TokenSource for BrokenToken {
    async fn id_token(&self) -> Result<Option<String>, anyhow::Error> {
        Err(anyhow::anyhow!("refresh token revoked"))
    }
}

fn create_database(server: &MockServer, source: impl TokenSource + 'static) -> FirebaseDatabase {
    let middleware = AuthMiddleware::new(Arc::new(source), TokenPlacement::Query("auth"));
    let client = ClientBuilder::new(Client::new()).with(middleware).build();
    FirebaseDatabase::new_with_client(client, &server.url("/"))
}

#[tokio::test]
async fn test_set_writes_json_with_the_id_token() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/messages/-NaKey.json")
            .query_param("auth", "id-token")
            .header("content-type", "application/json")
            .json_body(json!({"text": "hello", "name": "Alice"}));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"text": "hello", "name": "Alice"}));
    });

    let db = create_database(&server, StaticToken(Some("id-token")));
    db.reference("/messages/")
        .child("-NaKey")
        .set(&json!({"text": "hello", "name": "Alice"}))
        .await
        .unwrap();

    mock.assert();
}

#[tokio::test]
async fn test_set_reports_rule_rejections() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(PUT).path("/messages/k.json");
        then.status(401)
            .header("content-type", "application/json")
            .json_body(json!({"error": "Permission denied"}));
    });

    let db = create_database(&server, StaticToken(None));
    let err = db.reference("messages/k").set(&json!(1)).await.unwrap_err();

    assert!(matches!(err, DatabaseError::ApiError(ref m) if m.contains("Permission denied")));
}

#[tokio::test]
async fn test_token_failure_aborts_the_request() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(PUT);
        then.status(200);
    });

    let db = create_database(&server, BrokenToken);
    let err = db.reference("messages/k").set(&json!(1)).await.unwrap_err();

    assert!(matches!(err, DatabaseError::MiddlewareError(_)));
    mock.assert_hits(0);
}

#[test]
fn test_reference_paths() {
    let client = ClientBuilder::new(Client::new()).build();
    let db = FirebaseDatabase::new_with_client(client, "https://demo.firebaseio.com/");

    let messages = db.reference("/messages");
    assert_eq!(messages.path(), "messages");
    assert_eq!(messages.key(), Some("messages"));
    assert_eq!(messages.child("a/b/").path(), "messages/a/b");
    assert_eq!(db.reference("").key(), None);

    let (first, first_ref) = messages.push();
    let (second, _) = messages.push();
    assert!(first < second);
    assert_eq!(first_ref.path(), format!("messages/{}", first));
    assert_eq!(first_ref.key(), Some(first.as_str()));
}

#[tokio::test]
async fn test_listen_streams_events() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .query_param("auth", "id-token")
            .header("accept", "text/event-stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "event: put\n",
                "data: {\"path\":\"/\",\"data\":null}\n\n",
                "event: keep-alive\n",
                "data: null\n\n",
                "event: auth_revoked\n",
                "data: credential is no longer valid\n\n",
            ));
    });

    let db = create_database(&server, StaticToken(Some("id-token")));
    let events: Vec<StreamEvent> = db
        .reference("messages")
        .listen()
        .await
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    mock.assert();
    assert_eq!(
        events,
        vec![
            StreamEvent::Put(EventPayload {
                path: "/".to_string(),
                data: serde_json::Value::Null,
            }),
            StreamEvent::KeepAlive,
            StreamEvent::AuthRevoked("credential is no longer valid".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_listen_rejected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/secret.json");
        then.status(401)
            .header("content-type", "application/json")
            .json_body(json!({"error": "Permission denied"}));
    });

    let db = create_database(&server, StaticToken(None));
    let result = db.reference("secret").listen().await;

    assert!(matches!(result, Err(DatabaseError::ApiError(_))));
}
