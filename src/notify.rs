use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::ArchiveError;

pub trait Notifier: Send + Sync {
    fn notify(&self, success: bool, message: &str) -> Result<(), ArchiveError>;
}

/// Sends a run outcome through `notifier` if one is configured. Delivery
/// failures are logged and dropped.
pub fn notify_best_effort(notifier: Option<&dyn Notifier>, success: bool, message: &str) {
    let Some(notifier) = notifier else {
        debug!(success, body = message, "no notifier configured");
        return;
    };
    if let Err(err) = notifier.notify(success, message) {
        warn!(error = %err, "failed to deliver notification");
    }
}

/// Logs and reports a failure that ends the run before any fetch.
pub fn notify_startup_failure(notifier: Option<&dyn Notifier>, err: &ArchiveError) {
    error!(error = %err, "run aborted before any request");
    notify_best_effort(notifier, false, &format!("WHOOP archive could not start: {err}"));
}

#[derive(Clone)]
pub struct PushbulletNotifier {
    client: Client,
    url: String,
}

impl PushbulletNotifier {
    pub fn new(api_key: &str) -> Result<Self, ArchiveError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("whoop-archive/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiveError::NotifyHttp(err.to_string()))?,
        );
        headers.insert(
            "Access-Token",
            HeaderValue::from_str(api_key.trim())
                .map_err(|err| ArchiveError::NotifyHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| ArchiveError::NotifyHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: "https://api.pushbullet.com/v2/pushes".to_string(),
        })
    }
}

impl Notifier for PushbulletNotifier {
    fn notify(&self, success: bool, message: &str) -> Result<(), ArchiveError> {
        let title = if success {
            "WHOOP archive: success"
        } else {
            "WHOOP archive: failure"
        };
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "type": "note", "title": title, "body": message }))
            .send()
            .map_err(|err| ArchiveError::NotifyHttp(err.to_string()))?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "notification request failed".to_string());
        Err(ArchiveError::NotifyStatus { status, message })
    }
}
