//! HTTP assertion runner for steps declared against a base URL instead of
//! a page. Retries apply to transport failures only: a delivered 4xx/5xx is
//! deterministic and retrying would not change it.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::errors::ApiError;

/// Declarative HTTP probe attached to a test step.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiProbe {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Status the step asserts; defaults to any 2xx.
    #[serde(default)]
    pub expect_status: Option<u16>,
}

/// Transport retry policy. `max_retries = 5` means at most 6 total attempts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 250,
        }
    }
}

/// A delivered response; non-2xx is still a delivery, not an error.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

pub struct ApiRequestRunner {
    client: Client,
    policy: RetryPolicy,
}

impl ApiRequestRunner {
    pub fn new(policy: RetryPolicy, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| ApiError::InvalidRequest(format!("http client: {err}")))?;
        Ok(Self { client, policy })
    }

    pub async fn fetch(&self, probe: &ApiProbe) -> Result<ApiResponse, ApiError> {
        let url = Url::parse(&probe.url)
            .map_err(|err| ApiError::InvalidRequest(format!("'{}': {err}", probe.url)))?;
        let method: reqwest::Method = probe
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| ApiError::InvalidRequest(format!("method '{}'", probe.method)))?;

        let mut attempts = 0u32;
        let mut backoff = Duration::from_millis(self.policy.backoff_ms);
        loop {
            attempts += 1;
            let mut request = self.client.request(method.clone(), url.clone());
            for (name, value) in &probe.headers {
                request = request.header(name, value);
            }
            if let Some(body) = &probe.body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    debug!(status, attempts, url = %url, "api probe delivered");
                    return Ok(ApiResponse { status, body });
                }
                Err(err) => {
                    if attempts > self.policy.max_retries {
                        return Err(ApiError::Transport {
                            attempts,
                            detail: err.to_string(),
                        });
                    }
                    warn!(attempts, %err, url = %url, "api probe transport failure; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }
}

impl ApiResponse {
    /// Apply the probe's assertion: explicit status match, or any 2xx.
    pub fn satisfies(&self, probe: &ApiProbe) -> bool {
        match probe.expect_status {
            Some(expected) => self.status == expected,
            None => (200..300).contains(&self.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(url: &str) -> ApiProbe {
        ApiProbe {
            method: "GET".into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            expect_status: None,
        }
    }

    #[test]
    fn status_assertion_defaults_to_2xx() {
        let ok = ApiResponse {
            status: 204,
            body: String::new(),
        };
        let not_found = ApiResponse {
            status: 404,
            body: String::new(),
        };
        assert!(ok.satisfies(&probe("http://localhost/health")));
        assert!(!not_found.satisfies(&probe("http://localhost/health")));

        let mut expects_404 = probe("http://localhost/missing");
        expects_404.expect_status = Some(404);
        assert!(not_found.satisfies(&expects_404));
    }

    #[tokio::test]
    async fn invalid_url_rejected_without_attempts() {
        let runner = ApiRequestRunner::new(RetryPolicy::default(), Duration::from_secs(1)).unwrap();
        let err = runner.fetch(&probe("not a url")).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn transport_failures_respect_retry_bound() {
        let runner = ApiRequestRunner::new(
            RetryPolicy {
                max_retries: 2,
                backoff_ms: 1,
            },
            Duration::from_millis(250),
        )
        .unwrap();

        // Port 9 (discard) is closed in test environments: connection refused.
        let err = runner.fetch(&probe("http://127.0.0.1:9/health")).await.unwrap_err();
        match err {
            ApiError::Transport { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
