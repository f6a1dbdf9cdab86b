//! # SkyPortal client
//!
//! Minimal async client for the SkyPortal REST API hosting the MostHosts group.
//!
//! ## Protocol
//!
//! Every request carries an `Authorization: token <api token>` header. SkyPortal answers
//! with a JSON envelope `{"status": "success", "data": ...}`, but under load or on
//! misconfiguration it may answer with an HTML page or a non-2xx status:
//!
//! - [`classify_response`] turns anything that is not a JSON answer with a 2xx status into a
//!   [`MostHostsError::ExternalService`],
//! - [`extract_data`] additionally requires `status == "success"` and a `data` field.
//!
//! Transport errors, `429` and `5xx` answers are retried with exponential backoff, up to
//! [`RetryPolicy::max_attempts`] attempts in total.
//!
//! Uploading spectra is handled by [`upload`], on top of the [`SpectrumService`] seam.
pub mod upload;

use std::time::Duration;

use log::{debug, error, info, warn};
use reqwest::{header::CONTENT_TYPE, Client, Method};
use serde::Deserialize;
use serde_json::Value;

use crate::{config::SkyPortalConfig, mosthosts_errors::MostHostsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (1 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// A spectrum already attached to a SkyPortal source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteSpectrum {
    pub id: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub observed_at: Option<String>,
}

/// A SkyPortal source (only the fields used here).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Source {
    pub id: String,
    #[serde(default)]
    pub ra: Option<f64>,
    #[serde(default)]
    pub dec: Option<f64>,
    #[serde(default)]
    pub redshift: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SourcePage {
    #[serde(rename = "totalMatches")]
    total_matches: usize,
    sources: Vec<Source>,
}

#[derive(Debug, Deserialize)]
struct Instrument {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SpectraOfSource {
    spectra: Vec<RemoteSpectrum>,
}

fn external(status: u16, message: impl Into<String>) -> MostHostsError {
    MostHostsError::ExternalService {
        status,
        message: message.into(),
    }
}

fn truncated(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

/// Check a raw HTTP answer and parse its JSON body.
///
/// Arguments
/// ---------
/// * `status`: HTTP status code
/// * `content_type`: value of the `Content-Type` header, if any
/// * `body`: response body
///
/// Return
/// ------
/// * the parsed JSON body
/// * [`MostHostsError::ExternalService`] for HTML answers, non-2xx statuses (with the
///   SkyPortal error message when there is one) and non-JSON bodies
pub fn classify_response(
    status: u16,
    content_type: Option<&str>,
    body: &str,
) -> Result<Value, MostHostsError> {
    if content_type.is_some_and(|ct| ct.starts_with("text/html")) {
        return Err(external(status, "got back text/html instead of JSON"));
    }
    let parsed = serde_json::from_str::<Value>(body);
    if !(200..300).contains(&status) {
        let message = parsed
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| truncated(body).to_string());
        return Err(external(status, message));
    }
    parsed.map_err(|e| external(status, format!("response is not JSON ({e})")))
}

/// Unwrap the `data` field of a successful SkyPortal envelope.
pub fn extract_data(mut envelope: Value) -> Result<Value, MostHostsError> {
    match envelope.get("status").and_then(Value::as_str) {
        Some("success") => {}
        Some(other) => {
            let mut message = format!("SkyPortal query returned status {other}");
            if let Some(m) = envelope.get("message").and_then(Value::as_str) {
                message.push_str(&format!(" ({m})"));
            }
            return Err(external(200, message));
        }
        None => return Err(external(200, "SkyPortal query return had no status")),
    }
    envelope
        .get_mut("data")
        .map(Value::take)
        .ok_or_else(|| external(200, "SkyPortal query returned no data"))
}

fn is_retryable(err: &MostHostsError) -> bool {
    match err {
        MostHostsError::ExternalService { status, .. } => *status == 429 || *status >= 500,
        MostHostsError::ReqwestError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        _ => false,
    }
}

/// The SkyPortal operations used by the spectrum uploader.
#[allow(async_fn_in_trait)]
pub trait SpectrumService {
    async fn spectra_for_obj(&self, obj_id: &str) -> Result<Vec<RemoteSpectrum>, MostHostsError>;

    async fn post_spectrum(&self, upload: &upload::SpectrumUpload) -> Result<Value, MostHostsError>;
}

#[derive(Debug, Clone)]
pub struct SkyPortalClient {
    http: Client,
    api_url: String,
    token: String,
    retry: RetryPolicy,
}

impl SkyPortalClient {
    /// Create a client.
    ///
    /// Arguments
    /// ---------
    /// * `url`: base URL of the SkyPortal instance (without `/api`)
    /// * `token`: API token
    /// * `retry`: retry policy for transient failures
    pub fn new(url: &str, token: impl Into<String>, retry: RetryPolicy) -> Result<Self, MostHostsError> {
        if retry.max_attempts == 0 {
            return Err(MostHostsError::Config(
                "SkyPortal retry policy needs at least one attempt".into(),
            ));
        }
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(SkyPortalClient {
            http,
            api_url: format!("{}/api", url.trim_end_matches('/')),
            token: token.into(),
            retry,
        })
    }

    pub fn from_config(config: &SkyPortalConfig) -> Result<Self, MostHostsError> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| MostHostsError::Config("a SkyPortal API token is required".into()))?;
        Self::new(
            &config.url,
            token,
            RetryPolicy {
                max_attempts: config.max_attempts,
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            },
        )
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, MostHostsError> {
        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", format!("token {}", self.token))
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;
        classify_response(status, content_type.as_deref(), &text)
    }

    /// Send a request, retrying transient failures.
    ///
    /// Arguments
    /// ---------
    /// * `method`: HTTP method
    /// * `path`: API path relative to `<url>/api`, e.g. `"/instrument"`
    /// * `query`: query string parameters
    /// * `body`: JSON body, if any
    ///
    /// Return
    /// ------
    /// * the parsed JSON answer
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, MostHostsError> {
        let url = format!("{}{path}", self.api_url);
        let mut retry = 0;
        loop {
            match self.attempt(method.clone(), &url, query, body).await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable(&e) && retry + 1 < self.retry.max_attempts => {
                    retry += 1;
                    let pause = self.retry.backoff(retry);
                    warn!(
                        "{method} {url} failed ({e}), retry {retry}/{} in {pause:?}",
                        self.retry.max_attempts - 1
                    );
                    tokio::time::sleep(pause).await;
                }
                Err(e) => {
                    error!("{method} {url} failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Same as [`SkyPortalClient::request`], returning the `data` field of the envelope.
    pub async fn request_data(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, MostHostsError> {
        extract_data(self.request(method, path, query, body).await?)
    }

    pub async fn instrument_id(&self, name: &str) -> Result<i64, MostHostsError> {
        let data = self
            .request_data(Method::GET, "/instrument", &[("name", name.to_string())], None)
            .await?;
        let instruments: Vec<Instrument> = serde_json::from_value(data)?;
        instruments
            .first()
            .map(|i| i.id)
            .ok_or_else(|| external(200, format!("unknown instrument {name}")))
    }

    /// All sources of a group, reading the paged listing to the end.
    pub async fn sources_in_group(
        &self,
        group_id: i64,
        per_page: usize,
    ) -> Result<Vec<Source>, MostHostsError> {
        let mut sources = Vec::new();
        let mut page = 1usize;
        loop {
            let query = [
                ("group_ids", group_id.to_string()),
                ("numPerPage", per_page.to_string()),
                ("pageNumber", page.to_string()),
            ];
            let data = self.request_data(Method::GET, "/sources", &query, None).await?;
            let SourcePage {
                total_matches,
                sources: batch,
            } = serde_json::from_value(data)?;
            let empty = batch.is_empty();
            sources.extend(batch);
            debug!("Read {} of {total_matches} sources from SkyPortal", sources.len());
            if empty || sources.len() >= total_matches {
                break;
            }
            page += 1;
        }
        info!("Read {} sources of group {group_id}", sources.len());
        Ok(sources)
    }
}

impl SpectrumService for SkyPortalClient {
    async fn spectra_for_obj(&self, obj_id: &str) -> Result<Vec<RemoteSpectrum>, MostHostsError> {
        let data = self
            .request_data(Method::GET, &format!("/sources/{obj_id}/spectra"), &[], None)
            .await?;
        let SpectraOfSource { spectra } = serde_json::from_value(data)?;
        Ok(spectra)
    }

    async fn post_spectrum(&self, upload: &upload::SpectrumUpload) -> Result<Value, MostHostsError> {
        let body = serde_json::to_value(upload)?;
        self.request_data(Method::POST, "/spectra", &[], Some(&body))
            .await
    }
}
