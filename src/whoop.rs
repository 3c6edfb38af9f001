use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{Credentials, DateRange, Session};
use crate::error::ArchiveError;

pub const DEFAULT_BASE_URL: &str = "https://api-7.whoop.com";

/// Remote source of biometric records. Records are returned as raw JSON so
/// the archive keeps every field the service sends.
pub trait WhoopClient: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Result<Session, ArchiveError>;
    fn fetch_heart_rate(
        &self,
        session: &Session,
        range: DateRange,
        step_secs: u32,
    ) -> Result<Vec<Value>, ArchiveError>;
    fn fetch_sleep(&self, session: &Session, range: DateRange) -> Result<Vec<Value>, ArchiveError>;
    fn fetch_cycles(&self, session: &Session, range: DateRange)
    -> Result<Vec<Value>, ArchiveError>;
}

#[derive(Clone)]
pub struct WhoopHttpClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct HeartRateResponse {
    #[serde(default)]
    values: Vec<HeartRateValue>,
}

#[derive(Debug, Deserialize)]
struct HeartRateValue {
    data: i64,
    time: i64,
}

impl WhoopHttpClient {
    pub fn new() -> Result<Self, ArchiveError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ArchiveError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("whoop-archive/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiveError::WhoopHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ArchiveError::WhoopHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn handle_status(response: Response) -> Result<Response, ArchiveError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "WHOOP request failed".to_string());
        Err(ArchiveError::WhoopStatus { status, message })
    }

    // Short in-request retries for flaky connections; outages are handled
    // by the run-level backoff schedule.
    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, ArchiveError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Self::handle_status(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(ArchiveError::WhoopHttp(err.to_string()));
                }
            }
        }
    }

    fn get_json(
        &self,
        session: &Session,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ArchiveError> {
        let response = self.send_with_retries(|| {
            self.client
                .get(url)
                .bearer_auth(&session.access_token)
                .query(query)
        })?;
        response
            .json::<Value>()
            .map_err(|err| ArchiveError::WhoopPayload(err.to_string()))
    }

    fn cycles_url(&self, session: &Session) -> String {
        format!("{}/users/{}/cycles", self.base_url, session.user_id)
    }
}

impl WhoopClient for WhoopHttpClient {
    fn authenticate(&self, credentials: &Credentials) -> Result<Session, ArchiveError> {
        let url = format!("{}/oauth/token", self.base_url);
        let body = json!({
            "grant_type": "password",
            "issueRefresh": false,
            "username": credentials.username,
            "password": credentials.password,
        });
        // Sent once: a rejected or unreachable token endpoint aborts the run.
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|err| ArchiveError::Authentication(err.to_string()))?;
        let response = Self::handle_status(response)
            .map_err(|err| ArchiveError::Authentication(err.to_string()))?;
        let token: TokenResponse = response
            .json()
            .map_err(|err| ArchiveError::Authentication(err.to_string()))?;
        let expires_at = token
            .expires_in
            .and_then(|secs| Utc::now().checked_add_signed(chrono::Duration::seconds(secs)));
        Ok(Session {
            access_token: token.access_token,
            user_id: token.user.id,
            expires_at,
        })
    }

    fn fetch_heart_rate(
        &self,
        session: &Session,
        range: DateRange,
        step_secs: u32,
    ) -> Result<Vec<Value>, ArchiveError> {
        let url = format!(
            "{}/users/{}/metrics/heart_rate",
            self.base_url, session.user_id
        );
        let (start, end) = range_bounds(range);
        let payload = self.get_json(
            session,
            &url,
            &[
                ("start", start),
                ("end", end),
                ("step", step_secs.to_string()),
                ("order", "t".to_string()),
            ],
        )?;
        let parsed: HeartRateResponse = serde_json::from_value(payload)
            .map_err(|err| ArchiveError::WhoopPayload(err.to_string()))?;
        parsed
            .values
            .into_iter()
            .map(|value| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(value.time)
                    .ok_or_else(|| {
                        ArchiveError::WhoopPayload(format!("invalid sample time {}", value.time))
                    })?;
                Ok(json!({
                    "timestamp": timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    "heart_rate": value.data,
                }))
            })
            .collect()
    }

    /// Sleep events are embedded in the cycle payload under `sleep.sleeps`.
    fn fetch_sleep(&self, session: &Session, range: DateRange) -> Result<Vec<Value>, ArchiveError> {
        let cycles = self.fetch_cycles(session, range)?;
        Ok(cycles
            .iter()
            .filter_map(|cycle| cycle.pointer("/sleep/sleeps").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect())
    }

    fn fetch_cycles(
        &self,
        session: &Session,
        range: DateRange,
    ) -> Result<Vec<Value>, ArchiveError> {
        let (start, end) = range_bounds(range);
        let payload = self.get_json(
            session,
            &self.cycles_url(session),
            &[("start", start), ("end", end)],
        )?;
        match payload {
            Value::Array(items) => Ok(items),
            Value::Object(mut object) => match object.remove("records") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(ArchiveError::WhoopPayload(
                    "cycles response is neither an array nor a record page".to_string(),
                )),
            },
            other => Err(ArchiveError::WhoopPayload(format!(
                "unexpected cycles response: {other}"
            ))),
        }
    }
}

fn range_bounds(range: DateRange) -> (String, String) {
    (
        format!("{}T00:00:00.000Z", range.start),
        format!("{}T23:59:59.999Z", range.end),
    )
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
