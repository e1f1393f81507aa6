//! Tagging plugin call-out: POST a JSON description of a processed image to each enabled
//! plugin's webhook and collect the suggested tags.

use super::store::TaggingPlugin;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard deadline on a single plugin call.
pub const PLUGIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Tags below this confidence are discarded.
pub const CONFIDENCE_FLOOR: f64 = 0.5;

/// The request body a plugin receives.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRequest {
    /// Namespace path of the image.
    #[serde(rename = "file_path")]
    pub file_path: String,
    /// Basename of the image.
    #[serde(rename = "file_name")]
    pub file_name: String,
    /// MIME type derived from the extension.
    #[serde(rename = "content_type")]
    pub content_type: String,
    /// Size in bytes.
    pub size: i64,
    /// URL the plugin may fetch the bytes from.
    #[serde(rename = "image_url")]
    pub image_url: String,
}

/// One suggested tag.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginTag {
    /// The tag text.
    pub tag: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct PluginResponse {
    tags: Vec<PluginTag>,
}

/// Calls one plugin. HTTP errors and timeouts come back as an error string suitable for the
/// plugin's health field; the caller continues with the remaining plugins either way.
pub async fn call(client: &reqwest::Client, plugin: &TaggingPlugin, request: &PluginRequest) -> Result<Vec<PluginTag>, String> {
    let response = client
        .post(&plugin.url)
        .timeout(PLUGIN_TIMEOUT)
        .json(request)
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("plugin returned {status}"));
    }
    let body: PluginResponse = response.json().await.map_err(|e| format!("bad response body: {e}"))?;
    Ok(body.tags.into_iter().filter(|t| t.confidence >= CONFIDENCE_FLOOR).collect())
}
