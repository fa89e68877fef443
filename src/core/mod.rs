pub mod middleware;

use middleware::AuthMiddleware;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
    pub errors: Option<Vec<FirebaseSubError>>,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseSubError {
    pub message: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
}

// The Realtime Database reports failures as a bare `{"error": "..."}` string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed(FirebaseErrorResponse),
    Plain { error: String },
}

impl FirebaseErrorResponse {
    pub fn display_message(&self) -> String {
        format!("{} (code: {})", self.error.message, self.error.code)
    }
}

pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody::Detailed(error_resp)) => error_resp.display_message(),
        Ok(ErrorBody::Plain { error }) => format!("{} (status: {})", error, status),
        Err(_) => format!("{}: {}", default_msg, status),
    }
}

/// Builds the HTTP client shared by every service: transient failures are retried
/// with exponential backoff, and requests carry the signed-in user's token when an
/// [`AuthMiddleware`] is supplied.
pub fn build_client(auth: Option<AuthMiddleware>) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

    let builder = ClientBuilder::new(Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy));

    match auth {
        Some(middleware) => builder.with(middleware).build(),
        None => builder.build(),
    }
}
