//! HTTP plumbing shared by the vendor adapters.

use core::time::Duration;

use chrono::{DateTime, Utc};
use devassist_core::ProviderError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use serde_json::Value;

/// Builds the HTTP client used by one adapter.
///
/// # Errors
/// Returns [`ProviderError::Failed`] if the TLS backend cannot be initialised.
pub fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|error| ProviderError::Failed(format!("Failed to build HTTP client: {error}")))
}

/// Maps a transport failure (no usable HTTP response) to the taxonomy.
pub fn transport_error(error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Failed(format!("Request timed out: {error}"))
    } else if error.is_connect() {
        ProviderError::Failed(format!("Connection failed: {error}"))
    } else {
        ProviderError::Failed(format!("Request failed: {error}"))
    }
}

/// Non-success HTTP response, read in full for classification.
#[derive(Debug, Clone)]
pub struct HttpFailure {
    /// Status code.
    pub status: u16,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Raw response body.
    pub body: String,
}

impl HttpFailure {
    /// Drains a failed response.
    pub async fn read(response: Response) -> Self {
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Self {
            status,
            retry_after,
            body,
        }
    }

    /// Body parsed as JSON, when it is JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Human-readable summary: the vendor's `error.message` when present.
    pub fn message(&self) -> String {
        let vendor_message = self.json().and_then(|body| {
            body.pointer("/error/message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        });
        match vendor_message {
            Some(message) => format!("HTTP {}: {message}", self.status),
            None if self.body.trim().is_empty() => format!("HTTP {}", self.status),
            None => format!("HTTP {}: {}", self.status, truncate(self.body.trim(), 300)),
        }
    }
}

/// Parses a `Retry-After` header given in seconds or as an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<f64>() {
        return seconds_to_duration(seconds);
    }
    let date = DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Converts a vendor-supplied seconds value, rejecting nonsense.
pub fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs_f64(seconds))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut shortened: String = text.chars().take(max_chars).collect();
    shortened.push_str("...");
    shortened
}

/// Joins the API base URL and a path without doubling slashes.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers_with_retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(
            parse_retry_after(&headers_with_retry_after("5")),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse_retry_after(&headers_with_retry_after("1.5")),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(&headers_with_retry_after("soon")), None);
        assert_eq!(parse_retry_after(&headers_with_retry_after("-3")), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let headers = headers_with_retry_after("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_failure_message_prefers_vendor_text() {
        let failure = HttpFailure {
            status: 400,
            retry_after: None,
            body: r#"{"error":{"message":"bad request body"}}"#.to_owned(),
        };
        assert_eq!(failure.message(), "HTTP 400: bad request body");

        let plain = HttpFailure {
            status: 502,
            retry_after: None,
            body: String::new(),
        };
        assert_eq!(plain.message(), "HTTP 502");
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.openai.com/", "/v1/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
