use serde::{Deserialize, Serialize};

/// The identity of the signed-in user as seen by the chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Observable authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn(SignedInUser),
}

impl AuthState {
    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn(_))
    }
}

/// A provider offered by the sign-in flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignInProvider {
    Email,
    Federated { provider_id: String },
}

impl SignInProvider {
    pub fn google() -> Self {
        SignInProvider::Federated {
            provider_id: "google.com".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInWithPasswordRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInWithIdpRequest {
    pub request_uri: String,
    pub post_body: String,
    pub return_secure_token: bool,
    pub return_idp_credential: bool,
}

/// Response shared by `accounts:signInWithPassword` and `accounts:signInWithIdp`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInResponse {
    pub local_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshTokenRequest<'a> {
    pub grant_type: &'static str,
    pub refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshTokenResponse {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: String,
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LookupRequest<'a> {
    pub id_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LookupResponse {
    pub users: Option<Vec<UserRecord>>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub local_id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}
