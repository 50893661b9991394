use std::{future::Future, time::Duration};

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode, Url};

use super::FetchError;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub const DEFAULT_API_BASE: &str = "https://api.ambientweather.net/v1/devices/";

/// One attempt at pulling the latest reading body from the station API.
pub trait ReadingSource {
    fn fetch_body(&self) -> impl Future<Output = Result<String, FetchError>>;
}

/// Builds the device data URL: `<base><mac>?apiKey=..&applicationKey=..&limit=N`.
pub fn build_device_url(
    base: &str,
    mac_address: &str,
    api_key: &str,
    application_key: &str,
    limit: u32,
) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid API base URL '{base}'"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("API base URL '{base}' cannot carry a path"))?
        .pop_if_empty()
        .push(mac_address.trim());
    url.query_pairs_mut()
        .append_pair("apiKey", api_key.trim())
        .append_pair("applicationKey", application_key.trim())
        .append_pair("limit", &limit.to_string());
    Ok(url)
}

/// Copy of `url` with key parameters masked, for logging.
pub fn redacted(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key.to_ascii_lowercase().contains("key") {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

pub struct HttpSource {
    client: Client,
    url: Url,
}

impl HttpSource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, url })
    }
}

impl ReadingSource for HttpSource {
    async fn fetch_body(&self) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        let status = response.status();
        log_debug!("Response status: {status}");
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|err| FetchError::Body(err.to_string()))
    }
}
