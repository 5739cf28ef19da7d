//! TCP Receiver
//!
//! Accepts connections carrying length-prefixed request frames and answers
//! each with exactly one response frame. Oversized frames are drained
//! through the connection's skip buffer and answered with an error; the
//! connection stays open unless the frame was too large to drain.
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::frame::{read_frame, write_frame, Inbound};
use super::ingestion_guard::IngestionGuard;
use super::stats::{FrozenReceiverStats, ReceiverStats};
use super::traits::RequestHandler;
use crate::error::{MeridianError, Result};

pub struct TcpReceiver {
    pub local_addr: SocketAddr,
    listener: Arc<TcpListener>,
    guard: IngestionGuard,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<ReceiverStats>,
}

impl TcpReceiver {
    pub async fn new(
        bind_addr: SocketAddr,
        guard: IngestionGuard,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| crate::transport_error!("Socket creation failed: {}", e))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| crate::transport_error!("Socket creation failed: {}", e))?;

        Ok(Self {
            local_addr,
            listener: Arc::new(listener),
            guard,
            handler,
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    /// Start the accept loop
    pub fn start(&self) -> JoinHandle<()> {
        let listener = self.listener.clone();
        let stats = self.stats.clone();
        let handler = self.handler.clone();
        let guard = self.guard;

        tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("TCP accept failed: {}", e);
                        continue;
                    }
                };
                stats.connections_accepted.fetch_add(1, Ordering::Relaxed);

                let stats = stats.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        Self::serve_connection(stream, peer_addr, guard, handler, stats.clone())
                            .await
                    {
                        stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                        debug!("Connection from {} ended with error: {}", peer_addr, e);
                    }
                });
            }
        })
    }

    async fn serve_connection(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        guard: IngestionGuard,
        handler: Arc<dyn RequestHandler>,
        stats: Arc<ReceiverStats>,
    ) -> Result<()> {
        let mut skip = guard.skip_buffer();
        loop {
            match read_frame(&mut stream, &guard, &mut skip).await? {
                Inbound::Closed => return Ok(()),
                Inbound::Frame(body) => {
                    stats.frames_received.fetch_add(1, Ordering::Relaxed);
                    let response = handler.handle_request(&body).await?;
                    write_frame(&mut stream, &response).await?;
                }
                Inbound::Oversized { declared, drained } => {
                    stats.frames_oversized.fetch_add(1, Ordering::Relaxed);
                    let err = MeridianError::PayloadTooLarge {
                        declared,
                        limit: guard.limits().max_frame_size,
                    };
                    warn!("Frame from {}: {}", peer_addr, err);
                    write_frame(&mut stream, &handler.reject(&err)?).await?;
                    if !drained {
                        stats.connections_dropped.fetch_add(1, Ordering::Relaxed);
                        return Ok(());
                    }
                    stats
                        .bytes_drained
                        .fetch_add(declared as u64, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn get_stats(&self) -> FrozenReceiverStats {
        self.stats.freeze()
    }
}
