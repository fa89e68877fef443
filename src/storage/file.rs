use crate::core::parse_error_response;
use crate::storage::StorageError;
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use url::Url;

/// Represents an object within a Cloud Storage bucket.
pub struct File {
    client: ClientWithMiddleware,
    base_url: String,
    bucket_name: String,
    name: String,
}

/// Metadata of a Cloud Storage for Firebase object.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: Option<String>,
    pub bucket: Option<String>,
    pub generation: Option<String>,
    pub metageneration: Option<String>,
    pub content_type: Option<String>,
    pub time_created: Option<String>,
    pub updated: Option<String>,
    pub storage_class: Option<String>,
    pub size: Option<String>,
    pub md5_hash: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    /// Comma-separated list of tokens granting public read access.
    pub download_tokens: Option<String>,
    pub metadata: Option<std::collections::HashMap<String, String>>,
}

impl ObjectMetadata {
    /// The first download token, if the object has any.
    pub fn download_token(&self) -> Option<&str> {
        self.download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').map(str::trim).find(|t| !t.is_empty()))
    }
}

impl File {
    pub(crate) fn new(
        client: ClientWithMiddleware,
        base_url: String,
        bucket_name: String,
        name: String,
    ) -> Self {
        Self {
            client,
            base_url,
            bucket_name,
            name,
        }
    }

    /// Returns the name of the object.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the bucket containing the object.
    pub fn bucket(&self) -> &str {
        &self.bucket_name
    }

    // {base}/b/{bucket}/o/{name}, with the object name percent-encoded as a single segment.
    fn object_url(&self) -> Result<Url, StorageError> {
        let mut url = Url::parse(&format!("{}/b/{}/o/", self.base_url, self.bucket_name))
            .map_err(|e| StorageError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push(&self.name);
        Ok(url)
    }

    /// Uploads data to the object in a single request.
    ///
    /// # Arguments
    ///
    /// * `body` - The data to upload.
    /// * `mime_type` - The MIME type of the data.
    pub async fn save(
        &self,
        body: impl Into<reqwest::Body>,
        mime_type: &str,
    ) -> Result<ObjectMetadata, StorageError> {
        let url = format!("{}/b/{}/o", self.base_url, self.bucket_name);

        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", self.name.as_str())])
            .header(header::CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(parse_error_response(response, "Upload failed").await));
        }

        Ok(response.json().await?)
    }

    /// Gets the object's metadata.
    pub async fn get_metadata(&self) -> Result<ObjectMetadata, StorageError> {
        let response = self.client.get(self.object_url()?).send().await?;

        if !response.status().is_success() {
            return Err(StorageError::ApiError(
                parse_error_response(response, "Get metadata failed").await,
            ));
        }

        Ok(response.json().await?)
    }

    /// Builds the public download URL of the object.
    ///
    /// Uses the token in `metadata` when present and otherwise re-reads the metadata once.
    pub async fn download_url(&self, metadata: &ObjectMetadata) -> Result<String, StorageError> {
        let token = match metadata.download_token() {
            Some(token) => token.to_string(),
            None => self
                .get_metadata()
                .await?
                .download_token()
                .map(str::to_string)
                .ok_or_else(|| StorageError::MissingDownloadToken(self.name.clone()))?,
        };

        let mut url = self.object_url()?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", &token);
        Ok(url.into())
    }
}
