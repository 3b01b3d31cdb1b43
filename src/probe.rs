//! Probe executor.
//!
//! One probe is a bounded sequence of HTTP GET attempts against a single
//! target; its outcome is always a `CheckResult`, never an error.

use std::error::Error;
use std::io;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{redirect, Client};
use tokio_util::sync::CancellationToken;

use crate::db::{CheckResult, Target};

/// Attempts per probe, including the first.
const MAX_ATTEMPTS: u32 = 3;
/// Backoff before the second attempt; doubles after each retry.
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
/// Redirect hops followed before an attempt fails.
const MAX_REDIRECTS: usize = 5;

/// Build the shared probe client.
///
/// At most one idle connection is kept per host, aligning the pool with the
/// per-host serialization of probes.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .pool_max_idle_per_host(1)
        .build()
}

/// Probe one target and produce its outcome.
///
/// Up to three GET attempts are made. A 5xx response or a retryable
/// transport failure (timeout, connection refused, DNS) sleeps 200ms, then
/// 400ms, before the next attempt; any other response or failure is final.
/// Only the final attempt's status and latency are reported. Cancellation is
/// honored between attempts and finalizes with whatever the last attempt
/// produced.
pub async fn execute(client: &Client, target: &Target, cancel: &CancellationToken) -> CheckResult {
    let checked_at = Utc::now();
    let mut status_code: u16 = 0;
    let mut latency_ms: i64 = 0;
    let mut error = String::new();
    let mut backoff = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        let start = Instant::now();
        let outcome = client.get(&target.url).send().await;
        latency_ms = start.elapsed().as_millis() as i64;

        let retry = match outcome {
            Ok(resp) => {
                status_code = resp.status().as_u16();
                error.clear();
                resp.status().is_server_error()
            }
            Err(err) => {
                status_code = 0;
                error = error_text(&err);
                is_retryable(&err)
            }
        };

        if !retry || attempt == MAX_ATTEMPTS {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff *= 2;
    }

    CheckResult {
        target_id: target.id.clone(),
        checked_at,
        status_code,
        latency_ms,
        error,
    }
}

/// Whether a transport failure is worth another attempt.
///
/// Retryable: timeouts, connection refused, and DNS resolution failures.
/// Everything else, including the redirect limit, is final.
fn is_retryable(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        let text = cause.to_string();
        if text.contains("dns error")
            || text.contains("failed to lookup address")
            || text.contains("no such host")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Flatten an error chain into one line for the persisted outcome.
fn error_text(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
