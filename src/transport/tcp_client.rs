//! TCP request/response client
//!
//! Keeps one connection to a single target and reconnects lazily after
//! any failure. Callers own retry policy.
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use super::frame::{read_frame, write_frame, Inbound};
use super::ingestion_guard::{IngestionGuard, SkipBuffer};
use crate::error::{MeridianError, Result};

struct Connection {
    stream: TcpStream,
    skip: SkipBuffer,
}

pub struct TcpClient {
    target: SocketAddr,
    guard: IngestionGuard,
    request_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("target", &self.target)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl TcpClient {
    pub fn new(target: SocketAddr, guard: IngestionGuard, request_timeout: Duration) -> Self {
        Self {
            target,
            guard,
            request_timeout,
            connection: Mutex::new(None),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Send one request frame and wait for its response frame
    pub async fn send_request_response(&self, request: &[u8]) -> Result<Vec<u8>> {
        let mut slot = self.connection.lock().await;
        if slot.is_none() {
            let stream = timeout(self.request_timeout, TcpStream::connect(self.target))
                .await
                .map_err(|_| crate::transport_error!("connect to {} timed out", self.target))??;
            stream.set_nodelay(true)?;
            debug!("Connected to {}", self.target);
            *slot = Some(Connection {
                stream,
                skip: self.guard.skip_buffer(),
            });
        }

        let (result, reusable) = match slot.as_mut() {
            Some(conn) => timeout(self.request_timeout, Self::exchange(conn, &self.guard, request))
                .await
                .unwrap_or_else(|_| {
                    (
                        Err(crate::transport_error!("request to {} timed out", self.target)),
                        false,
                    )
                }),
            None => (
                Err(crate::transport_error!("no connection to {}", self.target)),
                false,
            ),
        };
        if !reusable {
            *slot = None;
        }
        result
    }

    /// Returns the response and whether the stream is still in sync
    async fn exchange(
        conn: &mut Connection,
        guard: &IngestionGuard,
        request: &[u8],
    ) -> (Result<Vec<u8>>, bool) {
        if let Err(e) = write_frame(&mut conn.stream, request).await {
            return (Err(e), false);
        }
        match read_frame(&mut conn.stream, guard, &mut conn.skip).await {
            Ok(Inbound::Frame(body)) => (Ok(body.to_vec()), true),
            Ok(Inbound::Oversized { declared, drained }) => (
                Err(MeridianError::PayloadTooLarge {
                    declared,
                    limit: guard.limits().max_frame_size,
                }),
                drained,
            ),
            Ok(Inbound::Closed) => (
                Err(crate::transport_error!("connection closed by peer")),
                false,
            ),
            Err(e) => (Err(e), false),
        }
    }
}
