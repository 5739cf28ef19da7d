//! The membership node
//!
//! Owns the directory and everything that reads or writes it: the TCP
//! heartbeat receiver, the system tables, the liveness ticker, and, in
//! member mode, a heartbeater reporting to another directory node.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

pub mod node_id;

pub use node_id::NodeId;

use crate::error::{MeridianError, Result};
use crate::membership::directory::{DirectorySnapshot, PeerDirectory, TickReport};
use crate::membership::heartbeat::{FrozenHeartbeatStats, HeartbeatReceiver};
use crate::membership::heartbeater::Heartbeater;
use crate::membership::messages::HeartbeatRequest;
use crate::membership::record::{PeerRegistration, ReportedStatus, TabletSummary};
use crate::resolver::Resolver;
use crate::settings::Settings;
use crate::transport::{FrozenReceiverStats, IngestionGuard, TcpClient, TcpReceiver};
use crate::vtable::{ReadRequest, ReadResponse, SystemTables};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub directory_version: u64,
    pub peers: usize,
    pub receiver: FrozenReceiverStats,
    pub heartbeats: FrozenHeartbeatStats,
}

pub struct MembershipNode {
    settings: Settings,
    registration: PeerRegistration,
    directory: Arc<PeerDirectory>,
    receiver: HeartbeatReceiver,
    tcp: TcpReceiver,
    guard: IngestionGuard,
    tables: Arc<SystemTables>,
    local_sequence: AtomicU64,
}

impl std::fmt::Debug for MembershipNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipNode")
            .field("node_id", &self.settings.node_id)
            .field("heartbeat_addr", &self.tcp.local_addr)
            .field("directory", &self.settings.directory)
            .field("peers", &self.directory.len())
            .finish()
    }
}

/// Running background tasks of a node
#[derive(Debug)]
pub struct NodeHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    receiver_task: JoinHandle<()>,
}

impl NodeHandle {
    pub async fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(()).await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        self.receiver_task.abort();
    }
}

impl MembershipNode {
    /// Validate settings, bind the heartbeat listener and build the tables.
    /// Fails with `SchemaMismatch` if a relation breaks its driver contract.
    pub async fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let config = settings.membership_config()?;
        let guard = IngestionGuard::new(settings.ingestion_limits())?;
        let node_id = settings.node_id();

        let directory = Arc::new(PeerDirectory::new(config));
        let registration = settings.registration();
        let now = Instant::now();
        directory.register(registration.clone(), now);

        let tables = SystemTables::standard(
            directory.clone(),
            Resolver::new(settings.private_address_policy),
            node_id,
        )?;
        info!(
            "[{}] Serving {} system tables: {:?}",
            node_id,
            tables.len(),
            tables.names().collect::<Vec<_>>()
        );

        let receiver = HeartbeatReceiver::new(directory.clone());
        let tcp =
            TcpReceiver::new(settings.tcp_bind_addr()?, guard, Arc::new(receiver.clone())).await?;
        info!("[{}] Heartbeat listener on {}", node_id, tcp.local_addr);

        let node = Self {
            settings,
            registration,
            directory,
            receiver,
            tcp,
            guard,
            tables: Arc::new(tables),
            local_sequence: AtomicU64::new(0),
        };
        node.beat_locally(now)?;
        Ok(node)
    }

    pub fn node_id(&self) -> NodeId {
        self.settings.node_id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn receiver(&self) -> &HeartbeatReceiver {
        &self.receiver
    }

    pub fn tables(&self) -> &Arc<SystemTables> {
        &self.tables
    }

    pub fn heartbeat_addr(&self) -> SocketAddr {
        self.tcp.local_addr
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.directory.snapshot()
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            node_id: self.node_id(),
            directory_version: self.directory.version(),
            peers: self.directory.len(),
            receiver: self.tcp.get_stats(),
            heartbeats: self.receiver.stats(),
        }
    }

    /// This node keeps its own record alive without going over the wire
    fn beat_locally(&self, now: Instant) -> Result<()> {
        let sequence = self.local_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let heartbeat = HeartbeatRequest {
            node_id: self.node_id(),
            sequence,
            reported_status: ReportedStatus::Serving,
            tablet_summary: TabletSummary::default(),
            registration: Some(self.registration.clone()),
            config_version: 0,
        };
        match self.directory.apply_heartbeat(&heartbeat, now) {
            Ok(_) => Ok(()),
            Err(MeridianError::StalePeerUpdate { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// One liveness pass over the directory
    pub fn tick(&self, now: Instant) -> TickReport {
        if let Err(e) = self.beat_locally(now) {
            warn!("[{}] Local heartbeat failed: {}", self.node_id(), e);
        }
        let report = self.directory.tick(now);
        if !report.is_empty() {
            info!(
                "[{}] Liveness changes: suspected={:?} dead={:?} purged={:?}",
                self.node_id(),
                report.suspected,
                report.dead,
                report.purged
            );
        }
        report
    }

    /// Read a system table off the async runtime, bounded by the request
    /// timeout
    pub async fn read_table(&self, name: &str, request: ReadRequest) -> Result<ReadResponse> {
        let table = self
            .tables
            .get(name)
            .ok_or_else(|| crate::api_error!("no such table: {}", name))?;
        bounded_blocking(name, self.settings.request_timeout(), move || {
            table.retrieve_data(&request)
        })
        .await
    }

    async fn run_ticker(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = time::interval(self.settings.tick_interval());
        info!(
            "[{}] Starting liveness ticker every {:?}",
            self.node_id(),
            self.settings.tick_interval()
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Instant::now());
                }
                _ = shutdown_rx.recv() => {
                    debug!("[{}] Liveness ticker stopping", self.node_id());
                    break;
                }
            }
        }
    }

    /// Start the heartbeat listener, the ticker and, in member mode, the
    /// heartbeater
    pub fn start(self: &Arc<Self>) -> NodeHandle {
        let receiver_task = self.tcp.start();
        let mut shutdown = Vec::new();
        let mut tasks = Vec::new();

        let (tick_tx, tick_rx) = mpsc::channel(1);
        tasks.push(tokio::spawn(self.clone().run_ticker(tick_rx)));
        shutdown.push(tick_tx);

        if let Some(target) = self.settings.directory {
            let client = TcpClient::new(target, self.guard, self.settings.request_timeout());
            let heartbeater = Heartbeater::new(
                client,
                self.registration.clone(),
                Duration::from_millis(self.settings.heartbeat_interval_ms),
            );
            let (beat_tx, beat_rx) = mpsc::channel(1);
            tasks.push(tokio::spawn(heartbeater.run(beat_rx)));
            shutdown.push(beat_tx);
        }

        NodeHandle {
            shutdown,
            tasks,
            receiver_task,
        }
    }
}

/// Run `read` on the blocking pool. A read that panics or outlives `limit`
/// surfaces as a retryable `DirectorySnapshotUnavailable`.
async fn bounded_blocking<T, F>(label: &str, limit: Duration, read: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(read);
    match time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(MeridianError::DirectorySnapshotUnavailable(format!(
            "read of {} failed: {}",
            label, join_error
        ))),
        Err(_) => Err(MeridianError::DirectorySnapshotUnavailable(format!(
            "read of {} exceeded {:?}",
            label, limit
        ))),
    }
}
