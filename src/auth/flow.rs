//! Credential-driven sign-in flow.
//!
//! The host UI collects credentials through a [`CredentialPrompt`]; the flow signs in
//! with [`FirebaseAuth`] and repeats the prompt on failure until the user either
//! succeeds or backs out.

use super::models::SignInProvider;
use super::FirebaseAuth;
use crate::chat::adapters::{SignInFlow, SignInOutcome};
use std::sync::Arc;
use tracing::warn;

/// What the user entered on the sign-in screen.
#[derive(Debug, Clone)]
pub enum Credential {
    Email {
        email: String,
        password: String,
    },
    Federated {
        provider_id: String,
        id_token: String,
    },
}

/// Asks the user for credentials. `None` means the user cancelled.
#[async_trait::async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn prompt(&self, providers: &[SignInProvider], last_error: Option<&str>) -> Option<Credential>;
}

pub struct CredentialFlow<P> {
    auth: Arc<FirebaseAuth>,
    prompt: P,
    request_uri: String,
}

impl<P: CredentialPrompt> CredentialFlow<P> {
    pub fn new(auth: Arc<FirebaseAuth>, prompt: P) -> Self {
        Self {
            auth,
            prompt,
            request_uri: "http://localhost".to_string(),
        }
    }

    /// Sets the `requestUri` reported to the federated sign-in endpoint.
    pub fn with_request_uri(mut self, request_uri: impl Into<String>) -> Self {
        self.request_uri = request_uri.into();
        self
    }

    fn offers(providers: &[SignInProvider], credential: &Credential) -> bool {
        providers.iter().any(|p| match (p, credential) {
            (SignInProvider::Email, Credential::Email { .. }) => true,
            (
                SignInProvider::Federated { provider_id },
                Credential::Federated { provider_id: used, .. },
            ) => provider_id == used,
            _ => false,
        })
    }
}

#[async_trait::async_trait]
impl<P: CredentialPrompt> SignInFlow for CredentialFlow<P> {
    async fn present(&self, providers: &[SignInProvider]) -> SignInOutcome {
        let mut last_error: Option<String> = None;

        loop {
            let Some(credential) = self.prompt.prompt(providers, last_error.as_deref()).await else {
                return SignInOutcome::Cancelled;
            };

            if !Self::offers(providers, &credential) {
                last_error = Some("this sign-in provider is not offered".to_string());
                continue;
            }

            let result = match &credential {
                Credential::Email { email, password } => {
                    self.auth.sign_in_with_email_and_password(email, password).await
                }
                Credential::Federated { provider_id, id_token } => {
                    self.auth
                        .sign_in_with_idp(provider_id, id_token, &self.request_uri)
                        .await
                }
            };

            match result {
                Ok(_) => return SignInOutcome::Completed,
                Err(e) => {
                    warn!(error = %e, "sign-in attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }
    }
}
