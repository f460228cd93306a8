// /////////////////////////////////////////////////////////////////////////////
// CRDT Storage Engine
// Copyright (c) 2025 A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Minimal HTTP server exposing `/metrics` (Prometheus text format) and
//! `/health` (plain "OK"), hand-rolled over a raw `TcpListener` rather than
//! pulling in a full HTTP stack for two read-only routes.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crdt_storage_domain::error::StorageError;

use super::service::MetricsService;

pub struct MetricsEndpoint {
    metrics: Arc<MetricsService>,
}

impl MetricsEndpoint {
    pub fn new(metrics: Arc<MetricsService>) -> Self {
        Self { metrics }
    }

    /// Binds `addr` and serves `/metrics` and `/health` until the process
    /// exits. Never returns on success.
    pub async fn start(&self, addr: &str) -> Result<(), StorageError> {
        let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| StorageError::InternalError(format!("failed to bind metrics endpoint on {addr}: {e}")))?;

        info!(%addr, "metrics endpoint listening");

        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    let metrics = self.metrics.clone();
                    tokio::spawn(async move {
                            if let Err(e) = handle_request(&mut stream, &metrics).await {
                                error!(error = %e, "error handling metrics request");
                            }
                        });
                }
                Err(e) => error!(error = %e, "error accepting metrics connection"),
            }
        }
    }
}

async fn handle_request(
    stream: &mut tokio::net::TcpStream,
    metrics: &MetricsService,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buffer = [0u8; 1024];
    let n = stream.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..n]);
    debug!(line = request.lines().next().unwrap_or(""), "metrics request");

    if request.starts_with("GET /metrics") {
        match metrics.render() {
            Ok(body) => {
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await?;
            }
            Err(e) => {
                let body = format!("error generating metrics: {e}");
                let response = format!(
                    "HTTP/1.1 500 Internal Server Error\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await?;
            }
        }
    } else if request.starts_with("GET /health") {
        stream
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK")
        .await?;
    } else {
        stream
        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\nNot Found")
        .await?;
    }

    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn serves_health_and_metrics_over_a_real_socket() {
        let metrics = Arc::new(MetricsService::new().unwrap());
        let endpoint = MetricsEndpoint::new(metrics);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let addr_string = addr.to_string();
        tokio::spawn(async move {
                let _ = endpoint.start(&addr_string).await;
            });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /health HTTP/1.1\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));
    }
}
