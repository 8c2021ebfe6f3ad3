//! HTTP access for the remote package index.
//!
//! Transient failures (connection errors, 5xx) are retried here. Client
//! errors such as 404 fail at once. Nothing below this layer retries.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{HttpFailure, RetryPolicy};
