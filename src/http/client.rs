//! HTTP client used by the remote index, with retries on transient errors.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::{Client, Response};
use std::future::Future;
use std::io::Write;
use std::time::Duration;

use super::retry::{RetryPolicy, classify, is_transient};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    /// Override how often and how patiently transient failures are retried.
    pub fn with_retry_policy(mut self, max_attempts: usize, retry_delay: Duration) -> Self {
        self.policy = RetryPolicy::new(max_attempts, retry_delay);
        self
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// GET `url` and return the body as text.
    #[tracing::instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.with_retry(url, || async {
            self.fetch(url)
                .await?
                .text()
                .await
                .context("Failed to read response body")
        })
        .await
    }

    /// Stream `url` into a writer made by `create_writer`, once per attempt,
    /// and return the number of bytes written.
    #[tracing::instrument(skip(self, create_writer))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        self.with_retry(url, || async {
            let mut response = self.fetch(url).await?;
            let mut writer = create_writer()?;
            let mut written: u64 = 0;
            while let Some(chunk) = response
                .chunk()
                .await
                .context("Failed to read chunk from download stream")?
            {
                writer
                    .write_all(&chunk)
                    .context("Failed to write downloaded chunk")?;
                written += chunk.len() as u64;
            }
            writer.flush().context("Failed to flush download")?;
            debug!("Downloaded {} bytes from {}", written, url);
            Ok(written)
        })
        .await
    }

    async fn fetch(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;
        response.error_for_status().map_err(|e| classify(e, url))
    }

    async fn with_retry<F, Fut, T>(&self, url: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) if self.policy.allows_another(attempt) => {
                    warn!(
                        "{}: attempt {}/{} failed ({:#}), retrying in {:?}",
                        url, attempt, self.policy.max_attempts, e, self.policy.delay
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("{} failed after {} attempts", url, attempt)));
                }
            }
        }
    }
}
