//! Which HTTP failures are worth another attempt.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// How many times a request is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Whether a failed attempt number `attempt` (1-based) may be followed by another.
    pub fn allows_another(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// A response that another attempt will not fix.
#[derive(Debug, Error)]
pub enum HttpFailure {
    #[error("{url} requires credentials (HTTP {status})")]
    Unauthorized { url: String, status: u16 },
    #[error("{url} not found on the index")]
    NotFound { url: String },
    #[error("index is throttling requests to {url}, try again later")]
    Throttled { url: String },
    #[error("index rejected {url} with HTTP {status}")]
    Rejected { url: String, status: u16 },
}

/// Classify a status code. `None` means the failure is transient.
pub fn permanent_failure(status: StatusCode, url: &str) -> Option<HttpFailure> {
    let url = url.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(HttpFailure::Unauthorized {
            url,
            status: status.as_u16(),
        }),
        StatusCode::NOT_FOUND | StatusCode::GONE => Some(HttpFailure::NotFound { url }),
        StatusCode::TOO_MANY_REQUESTS => Some(HttpFailure::Throttled { url }),
        s if s.is_client_error() => Some(HttpFailure::Rejected {
            url,
            status: s.as_u16(),
        }),
        _ => None,
    }
}

/// Turn an `error_for_status` failure into an error the retry loop understands.
pub fn classify(error: reqwest::Error, url: &str) -> anyhow::Error {
    match error.status().and_then(|s| permanent_failure(s, url)) {
        Some(failure) => failure.into(),
        None => error.into(),
    }
}

/// Anything that is not a recognised permanent failure is retried.
pub fn is_transient(error: &anyhow::Error) -> bool {
    error.downcast_ref::<HttpFailure>().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failures() {
        let url = "https://index.example/simple/custom/";
        assert!(matches!(
            permanent_failure(StatusCode::UNAUTHORIZED, url),
            Some(HttpFailure::Unauthorized { status: 401, .. })
        ));
        assert!(matches!(
            permanent_failure(StatusCode::FORBIDDEN, url),
            Some(HttpFailure::Unauthorized { status: 403, .. })
        ));
        assert!(matches!(
            permanent_failure(StatusCode::NOT_FOUND, url),
            Some(HttpFailure::NotFound { .. })
        ));
        assert!(matches!(
            permanent_failure(StatusCode::TOO_MANY_REQUESTS, url),
            Some(HttpFailure::Throttled { .. })
        ));
        assert!(matches!(
            permanent_failure(StatusCode::BAD_REQUEST, url),
            Some(HttpFailure::Rejected { status: 400, .. })
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
        ] {
            assert!(permanent_failure(status, "u").is_none());
        }
    }

    #[test]
    fn test_failure_messages_name_the_url() {
        let failure = HttpFailure::NotFound {
            url: "https://index.example/simple/nope/".into(),
        };
        assert_eq!(
            failure.to_string(),
            "https://index.example/simple/nope/ not found on the index"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&anyhow::anyhow!("connection reset by peer")));
        assert!(!is_transient(&anyhow::Error::from(HttpFailure::Throttled {
            url: "u".into()
        })));
    }

    #[test]
    fn test_policy_allows_another() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_another(1));

        let policy = RetryPolicy::default();
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }

    #[tokio::test]
    async fn test_classify_real_response() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/simple/custom/")
            .with_status(404)
            .create_async()
            .await;

        let url = format!("{}/simple/custom/", server.url());
        let err = reqwest::get(&url)
            .await
            .unwrap()
            .error_for_status()
            .unwrap_err();
        let err = classify(err, &url);
        assert!(!is_transient(&err));
        assert!(err.to_string().contains("/simple/custom/ not found"));
    }
}
