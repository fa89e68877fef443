use super::listen::{listen_request, EventStream};
use super::push_id::PushKey;
use super::{DatabaseError, FirebaseDatabase};
use crate::core::parse_error_response;
use reqwest::header;
use serde::Serialize;

/// A location in the database.
#[derive(Clone)]
pub struct DatabaseReference<'a> {
    db: &'a FirebaseDatabase,
    path: String,
}

impl<'a> DatabaseReference<'a> {
    pub(crate) fn new(db: &'a FirebaseDatabase, path: &str) -> Self {
        Self {
            db,
            path: path.trim_matches('/').to_string(),
        }
    }

    /// The slash-separated path of this location, without leading or trailing slashes.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The last segment of the path, or `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.path.rsplit('/').next().filter(|k| !k.is_empty())
    }

    /// Gets a reference to a location relative to this one.
    pub fn child(&self, path: &str) -> DatabaseReference<'a> {
        let path = path.trim_matches('/');
        let joined = if self.path.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.path, path)
        };
        DatabaseReference {
            db: self.db,
            path: joined,
        }
    }

    /// Reserves a new child under a freshly generated push key. Nothing is written until `set`.
    pub fn push(&self) -> (PushKey, DatabaseReference<'a>) {
        let key = self.db.next_push_key();
        let child = self.child(key.as_str());
        (key, child)
    }

    fn url(&self) -> String {
        format!("{}/{}.json", self.db.base_url(), self.path)
    }

    /// Writes `value` to this location, replacing whatever was there.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), DatabaseError> {
        let response = self
            .db
            .client()
            .put(self.url())
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DatabaseError::ApiError(
                parse_error_response(response, "Set value failed").await,
            ));
        }

        Ok(())
    }

    /// Opens a streaming read of this location.
    pub async fn listen(&self) -> Result<EventStream, DatabaseError> {
        listen_request(self.db.client(), &self.url()).await
    }
}
