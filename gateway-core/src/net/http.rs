//! Blocking HTTP client (C5).
//!
//! One `reqwest::blocking::Client` per venue, reused across requests so
//! the DNS cache and the underlying connection pool carry over between
//! calls. Every adapter's REST path reads: sign with its `auth` provider,
//! issue through here, and translate non-2xx or transport failures into
//! `GatewayError` per §7.

use crate::core::errors::GatewayError;
use reqwest::blocking::{Client, Response};
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

/// Env var overriding the TCP connect timeout, in milliseconds (§6).
pub const ENV_CONNECT_TIMEOUT_MS: &str = "LATENTSPEED_HTTP_CONNECT_TIMEOUT_MS";
/// Env var overriding the total request timeout, in milliseconds (§6).
pub const ENV_TOTAL_TIMEOUT_MS: &str = "LATENTSPEED_HTTP_TIMEOUT_MS";

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1500;
const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 2500;
const DNS_CACHE_LIFETIME: Duration = Duration::from_secs(60);

/// Timeouts resolved at construction time from env vars, falling back to
/// the spec's defaults on anything unparsable or unset.
#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub total: Duration,
}

impl HttpTimeouts {
    pub fn from_env() -> Self {
        let connect_ms = std::env::var(ENV_CONNECT_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
        let total_ms = std::env::var(ENV_TOTAL_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOTAL_TIMEOUT_MS);
        Self {
            connect: Duration::from_millis(connect_ms),
            total: Duration::from_millis(total_ms),
        }
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            total: Duration::from_millis(DEFAULT_TOTAL_TIMEOUT_MS),
        }
    }
}

/// A single venue's blocking REST transport: one pooled TLS client, one
/// set of timeouts. Adapters wrap this in a mutex when a venue requires
/// the connection to be used serially (§4.8).
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, timeouts: HttpTimeouts) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.total)
            .pool_idle_timeout(DNS_CACHE_LIFETIME)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a GET with the given headers and an already-encoded query
    /// string (no leading `?`, empty string for none).
    pub fn get(
        &self,
        path: &str,
        query: &str,
        headers: &[(&str, String)],
    ) -> Result<String, GatewayError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        self.send(Method::GET, &url, headers, None)
    }

    /// Issue a POST with the given headers and raw JSON body.
    pub fn post(
        &self,
        path: &str,
        body_json: &str,
        headers: &[(&str, String)],
    ) -> Result<String, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        self.send(Method::POST, &url, headers, Some(body_json.to_string()))
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<String>,
    ) -> Result<String, GatewayError> {
        let mut req = self.client.request(method, url);
        for (name, value) in headers {
            req = req.header(*name, value.clone());
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let response = req
            .send()
            .map_err(|e| GatewayError::TransportFailed(e.to_string()))?;
        Self::check_status(response)
    }

    fn check_status(response: Response) -> Result<String, GatewayError> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| GatewayError::TransportFailed(e.to_string()))?;
        if status.as_u16() >= 400 {
            return Err(GatewayError::HttpStatusError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Retry a transport-failed request exactly once, with a minimum 200ms
/// pause between attempts (§4.8). Only `TransportFailed` is retried; HTTP
/// status errors and everything else propagate on the first attempt.
pub fn send_with_single_retry<F>(mut attempt: F) -> Result<String, GatewayError>
where
    F: FnMut() -> Result<String, GatewayError>,
{
    match attempt() {
        Err(GatewayError::TransportFailed(first_err)) => {
            std::thread::sleep(Duration::from_millis(200));
            attempt().map_err(|e| match e {
                GatewayError::TransportFailed(second_err) => GatewayError::TransportFailed(
                    format!("retry also failed: {second_err} (first: {first_err})"),
                ),
                other => other,
            })
        }
        other => other,
    }
}

/// Render a `BTreeMap`-free key/value list into `k=v&k=v` form, matching
/// the deterministic ordering venue REST signing needs (§4.2).
pub fn encode_query(params: &HashMap<&str, String>) -> String {
    let mut pairs: Vec<(&&str, &String)> = params.iter().collect();
    pairs.sort_by_key(|(k, _)| **k);
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_default_to_spec_values() {
        let timeouts = HttpTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_millis(1500));
        assert_eq!(timeouts.total, Duration::from_millis(2500));
    }

    #[test]
    fn encode_query_sorts_keys() {
        let mut params = HashMap::new();
        params.insert("symbol", "ETHUSDT".to_string());
        params.insert("category", "spot".to_string());
        assert_eq!(encode_query(&params), "category=spot&symbol=ETHUSDT");
    }

    #[test]
    fn single_retry_gives_up_after_second_transport_failure() {
        let mut calls = 0;
        let result = send_with_single_retry(|| {
            calls += 1;
            Err(GatewayError::TransportFailed("connection refused".to_string()))
        });
        assert_eq!(calls, 2);
        assert!(matches!(result, Err(GatewayError::TransportFailed(_))));
    }

    #[test]
    fn single_retry_does_not_retry_http_status_errors() {
        let mut calls = 0;
        let result = send_with_single_retry(|| {
            calls += 1;
            Err(GatewayError::HttpStatusError { status: 429, body: "rate limited".to_string() })
        });
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(GatewayError::HttpStatusError { status: 429, .. })));
    }

    #[test]
    fn single_retry_succeeds_on_second_attempt() {
        let mut calls = 0;
        let result = send_with_single_retry(|| {
            calls += 1;
            if calls == 1 {
                Err(GatewayError::TransportFailed("timeout".to_string()))
            } else {
                Ok("ok".to_string())
            }
        });
        assert_eq!(calls, 2);
        assert_eq!(result.unwrap(), "ok");
    }
}
