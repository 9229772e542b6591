use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

/// Timeout for the submission request. The IndexNow endpoints answer fast;
/// nothing in the protocol long-polls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The JSON document POSTed to the endpoint. Field names follow the IndexNow
/// wire format (`host`, `key`, `urlList`, `keyLocation`); `keyLocation` is
/// omitted entirely when unset.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub host: String,
    pub key: String,
    pub url_list: Vec<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_location: Option<Url>,
}

pub struct IndexNowClient {
    client: Client,
    endpoint: Url,
    key: String,
    key_location: Option<Url>,
}

impl IndexNowClient {
    pub fn new(endpoint: Url, key: String, key_location: Option<Url>) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("Failed to construct HTTP client");

        Self {
            client,
            endpoint,
            key,
            key_location,
        }
    }

    /// Builds the submission document for `host` without sending it.
    pub fn submission(&self, host: &str, urls: &[Url]) -> SubmissionRequest {
        SubmissionRequest {
            host: host.to_string(),
            key: self.key.clone(),
            url_list: urls.to_vec(),
            key_location: self.key_location.clone(),
        }
    }

    /// POSTs the URL list and returns the response status and body exactly as
    /// received. Transport failures propagate to the caller untouched.
    pub async fn submit(
        &self,
        host: &str,
        urls: &[Url],
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let request = self.submission(host, urls);
        log::debug!(
            "submitting {} url(s) for {} to {}",
            request.url_list.len(),
            host,
            self.endpoint
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

/// Generates a fresh IndexNow key: 32 hex characters, within the protocol's
/// 8-128 hexadecimal requirement.
pub fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Writes the key verification file `<key>.txt` into `dir`. Search engines
/// fetch this file from the site root to prove key ownership.
pub fn write_key_file(dir: &Path, key: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(format!("{key}.txt"));
    std::fs::write(&path, key)?;
    Ok(path)
}
