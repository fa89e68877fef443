use std::collections::HashMap;

/// Body of a client `namespaces/firebase:fetch` request.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FetchRequest<'a> {
    pub app_instance_id: &'a str,
    pub app_id: &'a str,
    pub sdk_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<&'a str>,
}

/// Template state reported by the fetch endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchState {
    Update,
    NoChange,
    NoTemplate,
    EmptyConfig,
    #[serde(other)]
    InstanceStateUnspecified,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FetchResponse {
    #[serde(default)]
    pub entries: Option<HashMap<String, String>>,
    pub state: Option<FetchState>,
    #[serde(default)]
    pub template_version: Option<String>,
}

/// Client-side settings.
#[derive(Debug, Clone)]
pub struct RemoteConfigSettings {
    /// Fetches younger than this are served from the cache.
    pub minimum_fetch_interval: std::time::Duration,
}

impl Default for RemoteConfigSettings {
    fn default() -> Self {
        Self {
            minimum_fetch_interval: std::time::Duration::from_secs(12 * 60 * 60),
        }
    }
}
