//! One logical GET with bounded retries, linear backoff and 429-aware
//! cooldown. Every attempt passes through the source's token bucket first.

use crate::error::CollectError;
use crate::net::rate_limit::TokenBucket;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Cooldown applied on a 429 when the server doesn't say how long.
const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// How much response body to keep in an error (upstreams love to return
/// whole HTML pages on failure).
const ERROR_BODY_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub request_timeout: Duration,
    /// Linear backoff base: attempt N sleeps `backoff_base * N`.
    pub backoff_base: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(5),
        }
    }
}

/// Rate-limited retrying GET client, one per source adapter.
#[derive(Clone)]
pub struct RetryingFetcher {
    client: Client,
    bucket: Arc<TokenBucket>,
    config: RetryConfig,
}

impl RetryingFetcher {
    pub fn new(client: Client, bucket: Arc<TokenBucket>, config: RetryConfig) -> Self {
        Self {
            client,
            bucket,
            config,
        }
    }

    /// Issue one logical GET. Returns the first 2xx response, or the last
    /// observed cause once the attempt ceiling is exhausted.
    ///
    /// A 429 response suspends for the server-supplied cooldown and retries
    /// without consuming an attempt. GET-only semantics assumed, so
    /// repeating the call is safe.
    pub async fn fetch(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<reqwest::Response, CollectError> {
        let mut attempt: u32 = 0;

        loop {
            self.bucket.acquire().await;

            let mut request = self.client.get(url);
            if !params.is_empty() {
                request = request.query(params);
            }
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            let cause = match timeout(self.config.request_timeout, request.send()).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let cooldown = cooldown_secs(&response);
                        warn!(url, cooldown, "rate limited upstream, cooling down");
                        sleep(Duration::from_secs(cooldown)).await;
                        // Not counted as a retry attempt.
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    CollectError::UpstreamStatus {
                        status: status.as_u16(),
                        body: truncate(&body, ERROR_BODY_LIMIT),
                    }
                }
                Ok(Err(e)) => CollectError::Transport(e.to_string()),
                Err(_) => CollectError::Timeout(self.config.request_timeout),
            };

            if !cause.is_transient() {
                return Err(cause);
            }

            attempt += 1;
            if attempt >= self.config.max_attempts {
                return Err(CollectError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(cause),
                });
            }

            let delay = self.config.backoff_base * attempt;
            debug!(url, attempt, "request failed ({}), retrying in {:?}", cause, delay);
            sleep(delay).await;
        }
    }

    /// GET and decode the body as JSON. A body that doesn't decode is an
    /// upstream shape error, not a retryable failure.
    pub async fn fetch_json(
        &self,
        url: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<serde_json::Value, CollectError> {
        let response = self.fetch(url, params, headers).await?;
        response
            .json()
            .await
            .map_err(|e| CollectError::UpstreamShape(e.to_string()))
    }
}

fn cooldown_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_COOLDOWN_SECS)
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(max_attempts: u32) -> RetryingFetcher {
        RetryingFetcher::new(
            Client::new(),
            Arc::new(TokenBucket::new(1000.0, 1000.0)),
            RetryConfig {
                max_attempts,
                request_timeout: Duration::from_secs(5),
                backoff_base: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn returns_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"v": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let value = fetcher(3)
            .fetch_json(&format!("{}/ok", server.uri()), &[], &[])
            .await
            .unwrap();
        assert_eq!(value["v"], 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let server = MockServer::start().await;
        // First two attempts fail, third succeeds.
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let response = fetcher(3)
            .fetch(&format!("{}/flaky", server.uri()), &[], &[])
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn fails_only_after_attempt_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetcher(2)
            .fetch(&format!("{}/down", server.uri()), &[], &[])
            .await
            .unwrap_err();
        match err {
            CollectError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(
                    *last,
                    CollectError::UpstreamStatus { status: 503, .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_does_not_consume_an_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        // With a single allowed attempt, two 429s must still end in success.
        let response = fetcher(1)
            .fetch(&format!("{}/limited", server.uri()), &[], &[])
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "价格超出预期价格超出预期";
        let t = truncate(s, 10);
        assert!(t.len() <= 10);
        assert!(s.starts_with(&t));
    }
}
