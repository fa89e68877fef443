//! Firebase Authentication module.
//!
//! Client-side sign-in against the Identity Toolkit REST API. A successful sign-in
//! establishes a [`UserSession`] whose ID token is attached to Realtime Database and
//! Storage requests through [`crate::core::middleware::AuthMiddleware`], and is
//! refreshed through the secure token endpoint shortly before it expires.
//!
//! Authentication state is observable: [`FirebaseAuth::auth_state`] returns a
//! `watch` receiver that yields [`AuthState::SignedIn`] or [`AuthState::SignedOut`]
//! whenever the state changes.

pub mod flow;
pub mod models;
pub mod token;

#[cfg(test)]
mod tests;

pub use models::{AuthState, SignInProvider, SignedInUser, UserRecord};
pub use token::UserSession;

use crate::core::build_client;
use crate::core::middleware::TokenSource;
use crate::core::parse_error_response;
use chrono::Utc;
use models::{
    LookupRequest, LookupResponse, RefreshTokenRequest, RefreshTokenResponse, SignInResponse,
    SignInWithIdpRequest, SignInWithPasswordRequest,
};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use token::{expiry_from, IdTokenClaims};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

const IDENTITY_TOOLKIT_V1_API: &str = "https://identitytoolkit.googleapis.com/v1";
const SECURE_TOKEN_V1_API: &str = "https://securetoken.googleapis.com/v1";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("User not found")]
    UserNotFound,
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

pub struct FirebaseAuth {
    client: ClientWithMiddleware,
    api_key: String,
    identity_url: String,
    token_url: String,
    session: RwLock<Option<UserSession>>,
    state: watch::Sender<AuthState>,
}

impl FirebaseAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::new_with_urls(
            build_client(None),
            api_key,
            IDENTITY_TOOLKIT_V1_API.to_string(),
            SECURE_TOKEN_V1_API.to_string(),
        )
    }

    /// Creates a client talking to custom endpoints (the Auth emulator, or a mock server).
    pub fn new_with_urls(
        client: ClientWithMiddleware,
        api_key: impl Into<String>,
        identity_url: String,
        token_url: String,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        Self {
            client,
            api_key: api_key.into(),
            identity_url,
            token_url,
            session: RwLock::new(None),
            state,
        }
    }

    /// Subscribes to authentication state changes. The receiver starts with the current state.
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub async fn current_user(&self) -> Option<SignedInUser> {
        self.session.read().await.as_ref().map(user_of)
    }

    pub async fn sign_in_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignedInUser, AuthError> {
        let url = format!("{}/accounts:signInWithPassword", self.identity_url);
        let request = SignInWithPasswordRequest {
            email,
            password,
            return_secure_token: true,
        };

        let response: SignInResponse = self.post(&url, &request, "Sign in with password failed").await?;
        self.establish(response).await
    }

    /// Signs in with a credential issued by a federated identity provider
    /// (e.g. a Google ID token for `google.com`).
    pub async fn sign_in_with_idp(
        &self,
        provider_id: &str,
        provider_id_token: &str,
        request_uri: &str,
    ) -> Result<SignedInUser, AuthError> {
        let url = format!("{}/accounts:signInWithIdp", self.identity_url);
        let post_body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id_token", provider_id_token)
            .append_pair("providerId", provider_id)
            .finish();
        let request = SignInWithIdpRequest {
            request_uri: request_uri.to_string(),
            post_body,
            return_secure_token: true,
            return_idp_credential: true,
        };

        let response: SignInResponse = self.post(&url, &request, "Sign in with IdP failed").await?;
        self.establish(response).await
    }

    /// Returns a valid ID token for the signed-in user, refreshing it when it is about to expire.
    pub async fn id_token(&self) -> Result<Option<String>, AuthError> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                None => return Ok(None),
                Some(s) if !s.is_expiring(Utc::now()) => return Ok(Some(s.id_token.clone())),
                Some(_) => {}
            }
        }

        let mut session = self.session.write().await;
        let current = match session.as_ref() {
            None => return Ok(None),
            Some(s) if !s.is_expiring(Utc::now()) => return Ok(Some(s.id_token.clone())),
            Some(s) => s.clone(),
        };

        let refreshed = self.refresh(&current).await?;
        let token = refreshed.id_token.clone();
        *session = Some(refreshed);
        Ok(Some(token))
    }

    /// Re-reads the signed-in user's profile and updates the published display name.
    pub async fn reload_user(&self) -> Result<UserRecord, AuthError> {
        let id_token = self.id_token().await?.ok_or(AuthError::UserNotFound)?;
        let url = format!("{}/accounts:lookup", self.identity_url);
        let request = LookupRequest { id_token: &id_token };

        let response: LookupResponse = self.post(&url, &request, "Get user failed").await?;
        let record = response
            .users
            .and_then(|mut users| users.pop())
            .ok_or(AuthError::UserNotFound)?;

        let mut session = self.session.write().await;
        if let Some(s) = session.as_mut() {
            s.display_name = record.display_name.clone();
            s.email = record.email.clone();
            self.publish(AuthState::SignedIn(user_of(s)));
        }
        Ok(record)
    }

    pub async fn sign_out(&self) {
        let previous = self.session.write().await.take();
        if let Some(s) = previous {
            info!(uid = %s.uid, "signed out");
        }
        self.publish(AuthState::SignedOut);
    }

    async fn establish(&self, response: SignInResponse) -> Result<SignedInUser, AuthError> {
        let session = UserSession {
            uid: response.local_id,
            display_name: response.display_name.filter(|n| !n.is_empty()),
            email: response.email,
            expires_at: expiry_from(&response.expires_in, Utc::now())?,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        };
        let user = user_of(&session);
        *self.session.write().await = Some(session);

        info!(uid = %user.uid, "signed in");
        self.publish(AuthState::SignedIn(user.clone()));
        Ok(user)
    }

    async fn refresh(&self, current: &UserSession) -> Result<UserSession, AuthError> {
        debug!(uid = %current.uid, "refreshing ID token");
        let url = format!("{}/token", self.token_url);
        let request = RefreshTokenRequest {
            grant_type: "refresh_token",
            refresh_token: &current.refresh_token,
        };

        let response: RefreshTokenResponse = self.post(&url, &request, "Token refresh failed").await?;
        let claims = IdTokenClaims::peek(&response.id_token)?;

        Ok(UserSession {
            uid: response.user_id,
            display_name: claims.name.or_else(|| current.display_name.clone()),
            email: claims.email.or_else(|| current.email.clone()),
            expires_at: expiry_from(&response.expires_in, Utc::now())?,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        })
    }

    fn publish(&self, next: AuthState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        default_msg: &str,
    ) -> Result<R, AuthError> {
        let response = self
            .client
            .post(url)
            .query(&[("key", &self.api_key)])
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::ApiError(parse_error_response(response, default_msg).await));
        }

        Ok(response.json().await?)
    }
}

fn user_of(session: &UserSession) -> SignedInUser {
    SignedInUser {
        uid: session.uid.clone(),
        display_name: session.display_name.clone(),
        email: session.email.clone(),
    }
}

#[async_trait::async_trait]
impl TokenSource for FirebaseAuth {
    async fn id_token(&self) -> Result<Option<String>, anyhow::Error> {
        Ok(FirebaseAuth::id_token(self).await?)
    }
}
