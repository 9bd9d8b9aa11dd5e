//! HTTP probe implementation.

use std::time::{Duration, Instant};
use super::ProbeError;

/// A completed HTTP exchange. Any status code counts as completed.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub elapsed: Duration,
    pub status_code: u16,
    pub size_bytes: u64,
}

/// Run an HTTP GET probe against the given address.
///
/// The elapsed time covers the full body transfer.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<HttpResponse, ProbeError> {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    };

    let start = Instant::now();

    let response = client.get(&url).send().await.map_err(map_err)?;
    let status_code = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let body = response.bytes().await.map_err(map_err)?;

    Ok(HttpResponse {
        elapsed: start.elapsed(),
        status_code,
        size_bytes: body.len() as u64,
    })
}
