use http::Extensions;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};
use std::sync::Arc;

/// Supplies the ID token of the currently signed-in user, if any.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn id_token(&self) -> Result<Option<String>, anyhow::Error>;
}

/// Where a service expects the user's ID token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPlacement {
    /// Appended as a query parameter, e.g. `?auth=<token>` for the Realtime Database.
    Query(&'static str),
    /// Sent as `Authorization: <scheme> <token>`, e.g. `Firebase` for Storage.
    Header(&'static str),
}

#[derive(Clone)]
pub struct AuthMiddleware {
    source: Arc<dyn TokenSource>,
    placement: TokenPlacement,
}

impl AuthMiddleware {
    pub fn new(source: Arc<dyn TokenSource>, placement: TokenPlacement) -> Self {
        Self { source, placement }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self.source.id_token().await.map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!("Failed to get auth token: {}", e))
        })?;

        // Anonymous requests go through untouched; the backend's rules decide.
        if let Some(token) = token {
            match self.placement {
                TokenPlacement::Query(name) => {
                    req.url_mut().query_pairs_mut().append_pair(name, &token);
                }
                TokenPlacement::Header(scheme) => {
                    let value = header::HeaderValue::from_str(&format!("{} {}", scheme, token))
                        .map_err(|e| reqwest_middleware::Error::Middleware(e.into()))?;
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                }
            }
        }

        next.run(req, extensions).await
    }
}
