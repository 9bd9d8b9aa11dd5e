//! TCP connect probe implementation.

use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::ProbeError;

/// Open a TCP connection to `host:port` and return the time to connect.
///
/// Name resolution counts towards the elapsed time. The socket is closed immediately.
pub async fn run_tcp_probe(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    let start = Instant::now();

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let elapsed = start.elapsed();
    drop(stream);

    Ok(elapsed)
}
