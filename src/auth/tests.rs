use super::*;
use crate::auth::flow::{Credential, CredentialFlow, CredentialPrompt};
use crate::chat::adapters::{SignInFlow, SignInOutcome};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn create_auth(server: &MockServer) -> FirebaseAuth {
    let client = ClientBuilder::new(Client::new()).build();
    FirebaseAuth::new_with_urls(
        client,
        "test-key",
        server.url("/v1"),
        server.url("/securetoken/v1"),
    )
}

fn id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

fn mock_password_sign_in<'a>(server: &'a MockServer, expires_in: &str) -> httpmock::Mock<'a> {
    let expires_in = expires_in.to_string();
    server.mock(move |when, then| {
        when.method(POST)
            .path("/v1/accounts:signInWithPassword")
            .query_param("key", "test-key")
            .header("content-type", "application/json")
            .json_body(json!({
                "email": "alice@example.com",
                "password": "secret",
                "returnSecureToken": true
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "localId": "uid-alice",
                "email": "alice@example.com",
                "displayName": "Alice",
                "idToken": "id-token-1",
                "refreshToken": "refresh-1",
                "expiresIn": expires_in
            }));
    })
}

#[tokio::test]
async fn test_sign_in_with_email_and_password() {
    let server = MockServer::start();
    let mock = mock_password_sign_in(&server, "3600");
    let auth = create_auth(&server);
    let mut state = auth.auth_state();
    assert_eq!(*state.borrow(), AuthState::SignedOut);

    let user = auth
        .sign_in_with_email_and_password("alice@example.com", "secret")
        .await
        .unwrap();

    mock.assert();
    assert_eq!(user.uid, "uid-alice");
    assert_eq!(user.display_name.as_deref(), Some("Alice"));
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), AuthState::SignedIn(user.clone()));
    assert_eq!(auth.current_user().await, Some(user));
    assert_eq!(auth.id_token().await.unwrap().as_deref(), Some("id-token-1"));
}

#[tokio::test]
async fn test_sign_in_failure_keeps_the_user_signed_out() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/accounts:signInWithPassword");
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({
                "error": {
                    "code": 400,
                    "message": "INVALID_PASSWORD",
                    "errors": [{"message": "INVALID_PASSWORD", "domain": "global", "reason": "invalid"}]
                }
            }));
    });
    let auth = create_auth(&server);

    let err = auth
        .sign_in_with_email_and_password("alice@example.com", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::ApiError(ref m) if m.contains("INVALID_PASSWORD")));
    assert_eq!(*auth.auth_state().borrow(), AuthState::SignedOut);
    assert!(auth.id_token().await.unwrap().is_none());
}

#[tokio::test]
async fn test_sign_in_with_idp() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/accounts:signInWithIdp")
            .query_param("key", "test-key")
            .json_body(json!({
                "requestUri": "http://localhost",
                "postBody": "id_token=google-id-token&providerId=google.com",
                "returnSecureToken": true,
                "returnIdpCredential": true
            }));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "localId": "uid-bob",
                "idToken": "id-token-bob",
                "refreshToken": "refresh-bob",
                "expiresIn": "3600",
                "federatedId": "https://accounts.google.com/123"
            }));
    });
    let auth = create_auth(&server);

    let user = auth
        .sign_in_with_idp("google.com", "google-id-token", "http://localhost")
        .await
        .unwrap();

    mock.assert();
    assert_eq!(user.uid, "uid-bob");
    assert_eq!(user.display_name, None);
}

#[tokio::test]
async fn test_expiring_token_is_refreshed() {
    let server = MockServer::start();
    mock_password_sign_in(&server, "30");
    let fresh = id_token(json!({
        "sub": "uid-alice",
        "exp": 4102444800i64,
        "name": "Alice Liddell",
        "email": "alice@example.com"
    }));
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/securetoken/v1/token")
            .query_param("key", "test-key")
            .json_body(json!({"grant_type": "refresh_token", "refresh_token": "refresh-1"}));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "id_token": fresh.clone(),
                "refresh_token": "refresh-2",
                "expires_in": "3600",
                "token_type": "Bearer",
                "user_id": "uid-alice",
                "project_id": "123"
            }));
    });
    let auth = create_auth(&server);
    auth.sign_in_with_email_and_password("alice@example.com", "secret")
        .await
        .unwrap();

    assert_eq!(auth.id_token().await.unwrap(), Some(fresh.clone()));
    // The refreshed token is valid for an hour, so it is reused.
    assert_eq!(auth.id_token().await.unwrap(), Some(fresh));
    refresh.assert_hits(1);

    let user = auth.current_user().await.unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Alice Liddell"));
}

#[tokio::test]
async fn test_reload_user_publishes_the_new_display_name() {
    let server = MockServer::start();
    mock_password_sign_in(&server, "3600");
    let lookup = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/accounts:lookup")
            .json_body(json!({"idToken": "id-token-1"}));
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "users": [{
                    "localId": "uid-alice",
                    "email": "alice@example.com",
                    "emailVerified": true,
                    "displayName": "Alice L."
                }]
            }));
    });
    let auth = create_auth(&server);
    auth.sign_in_with_email_and_password("alice@example.com", "secret")
        .await
        .unwrap();
    let mut state = auth.auth_state();

    let record = auth.reload_user().await.unwrap();

    lookup.assert();
    assert!(record.email_verified);
    assert!(state.has_changed().unwrap());
    match &*state.borrow_and_update() {
        AuthState::SignedIn(user) => assert_eq!(user.display_name.as_deref(), Some("Alice L.")),
        AuthState::SignedOut => panic!("expected a signed-in state"),
    };
}

#[tokio::test]
async fn test_sign_out_clears_the_session() {
    let server = MockServer::start();
    mock_password_sign_in(&server, "3600");
    let auth = create_auth(&server);
    auth.sign_in_with_email_and_password("alice@example.com", "secret")
        .await
        .unwrap();

    auth.sign_out().await;

    assert_eq!(*auth.auth_state().borrow(), AuthState::SignedOut);
    assert!(auth.current_user().await.is_none());
    assert!(auth.id_token().await.unwrap().is_none());
    assert!(matches!(auth.reload_user().await, Err(AuthError::UserNotFound)));
}

#[test]
fn test_peek_claims() {
    let token = id_token(json!({"sub": "uid-1", "exp": 1700000000, "email": "a@b.c"}));
    let claims = token::IdTokenClaims::peek(&token).unwrap();
    assert_eq!(claims.sub, "uid-1");
    assert_eq!(claims.exp, 1700000000);
    assert_eq!(claims.name, None);
    assert_eq!(claims.email.as_deref(), Some("a@b.c"));

    assert!(matches!(
        token::IdTokenClaims::peek("not-a-jwt"),
        Err(AuthError::InvalidToken(_))
    ));
    assert!(matches!(
        token::IdTokenClaims::peek("a.!!!.c"),
        Err(AuthError::InvalidToken(_))
    ));
}

#[test]
fn test_session_expiry_margin() {
    let now = Utc::now();
    let session = UserSession {
        uid: "u".to_string(),
        display_name: None,
        email: None,
        id_token: "t".to_string(),
        refresh_token: "r".to_string(),
        expires_at: now + chrono::Duration::seconds(90),
    };
    assert!(!session.is_expiring(now));
    assert!(session.is_expiring(now + chrono::Duration::seconds(31)));
    assert!(token::expiry_from("nope", now).is_err());
}

struct ScriptedPrompt {
    answers: Mutex<Vec<Option<Credential>>>,
    errors_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedPrompt {
    fn new(mut answers: Vec<Option<Credential>>) -> Self {
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            errors_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl CredentialPrompt for ScriptedPrompt {
    async fn prompt(&self, _providers: &[SignInProvider], last_error: Option<&str>) -> Option<Credential> {
        self.errors_seen.lock().unwrap().push(last_error.map(str::to_string));
        self.answers.lock().unwrap().pop().flatten()
    }
}

fn email(password: &str) -> Option<Credential> {
    Some(Credential::Email {
        email: "alice@example.com".to_string(),
        password: password.to_string(),
    })
}

#[tokio::test]
async fn test_credential_flow_retries_until_success() {
    let server = MockServer::start();
    mock_password_sign_in(&server, "3600");
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/accounts:signInWithPassword")
            .json_body(json!({
                "email": "alice@example.com",
                "password": "wrong",
                "returnSecureToken": true
            }));
        then.status(400)
            .header("content-type", "application/json")
            .json_body(json!({"error": {"code": 400, "message": "INVALID_PASSWORD"}}));
    });
    let auth = Arc::new(create_auth(&server));
    let prompt = Arc::new(ScriptedPrompt::new(vec![
        Some(Credential::Federated {
            provider_id: "github.com".to_string(),
            id_token: "t".to_string(),
        }),
        email("wrong"),
        email("secret"),
    ]));
    let flow = CredentialFlow::new(auth.clone(), SharedPrompt(prompt.clone()));

    let outcome = flow.present(&[SignInProvider::Email, SignInProvider::google()]).await;

    assert_eq!(outcome, SignInOutcome::Completed);
    assert!(auth.auth_state().borrow().is_signed_in());
    let errors = prompt.errors_seen.lock().unwrap().clone();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[0], None);
    assert!(errors[1].as_deref().unwrap().contains("not offered"));
    assert!(errors[2].as_deref().unwrap().contains("INVALID_PASSWORD"));
}

#[tokio::test]
async fn test_credential_flow_cancel() {
    let server = MockServer::start();
    let auth = Arc::new(create_auth(&server));
    let flow = CredentialFlow::new(auth.clone(), ScriptedPrompt::new(vec![None]));

    assert_eq!(flow.present(&[SignInProvider::Email]).await, SignInOutcome::Cancelled);
    assert!(!auth.auth_state().borrow().is_signed_in());
}

struct SharedPrompt(Arc<ScriptedPrompt>);

#[async_trait::async_trait]
impl CredentialPrompt for SharedPrompt {
    async fn prompt(&self, providers: &[SignInProvider], last_error: Option<&str>) -> Option<Credential> {
        self.0.prompt(providers, last_error).await
    }
}
