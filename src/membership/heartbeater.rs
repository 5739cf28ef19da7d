//! Heartbeater: the member side of membership
//!
//! Registers with a directory node, then sends heartbeats on a timer with
//! strictly increasing sequence numbers. Sequences start from the wall
//! clock in microseconds so a restarted member is never considered stale,
//! and jump forward to it again whenever the directory reports one stale.
use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use super::messages::{HeartbeatRequest, HeartbeatResponse, RpcRequest, RpcResponse};
use super::record::{PeerRegistration, ReportedStatus, TabletSummary};
use crate::error::Result;
use crate::transport::TcpClient;

/// Runtime flag that retunes the heartbeat period
pub const HEARTBEAT_INTERVAL_FLAG: &str = "heartbeat_interval_ms";

fn wall_clock_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

pub struct Heartbeater {
    client: TcpClient,
    registration: PeerRegistration,
    interval: Duration,
    sequence: u64,
    registered: bool,
    reported_status: ReportedStatus,
    tablet_summary: TabletSummary,
    config_version: u64,
    flags: BTreeMap<String, String>,
}

impl std::fmt::Debug for Heartbeater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeater")
            .field("node_id", &self.registration.node_id)
            .field("target", &self.client.target())
            .field("interval", &self.interval)
            .field("sequence", &self.sequence)
            .field("registered", &self.registered)
            .finish()
    }
}

impl Heartbeater {
    pub fn new(client: TcpClient, registration: PeerRegistration, interval: Duration) -> Self {
        Self {
            client,
            registration,
            interval,
            sequence: wall_clock_micros(),
            registered: false,
            reported_status: ReportedStatus::Starting,
            tablet_summary: TabletSummary::default(),
            config_version: 0,
            flags: BTreeMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn flags(&self) -> &BTreeMap<String, String> {
        &self.flags
    }

    pub fn set_reported_status(&mut self, status: ReportedStatus) {
        self.reported_status = status;
    }

    pub fn set_tablet_summary(&mut self, summary: TabletSummary) {
        self.tablet_summary = summary;
    }

    async fn call(&self, request: &RpcRequest) -> Result<RpcResponse> {
        let bytes = self.client.send_request_response(&request.serialize()?).await?;
        match RpcResponse::deserialize(&bytes)? {
            RpcResponse::Error { kind, message } => {
                Err(crate::transport_error!("{} from directory: {}", kind, message))
            }
            response => Ok(response),
        }
    }

    pub async fn register(&mut self) -> Result<u64> {
        match self
            .call(&RpcRequest::Register(self.registration.clone()))
            .await?
        {
            RpcResponse::Registered { directory_version } => {
                self.registered = true;
                info!(
                    "Registered {} with {} (directory version {})",
                    self.registration.node_id,
                    self.client.target(),
                    directory_version
                );
                Ok(directory_version)
            }
            other => Err(crate::transport_error!(
                "unexpected response to registration: {:?}",
                other
            )),
        }
    }

    /// Send one heartbeat; carries the registration while unregistered
    pub async fn beat(&mut self) -> Result<HeartbeatResponse> {
        self.sequence += 1;
        let request = HeartbeatRequest {
            node_id: self.registration.node_id,
            sequence: self.sequence,
            reported_status: self.reported_status,
            tablet_summary: self.tablet_summary,
            registration: (!self.registered).then(|| self.registration.clone()),
            config_version: self.config_version,
        };
        let response = match self.call(&RpcRequest::Heartbeat(request)).await? {
            RpcResponse::Heartbeat(response) => response,
            other => {
                return Err(crate::transport_error!(
                    "unexpected response to heartbeat: {:?}",
                    other
                ))
            }
        };

        if response.needs_reregister {
            debug!("Directory lost {}, re-registering", self.registration.node_id);
            self.registered = false;
        } else {
            self.registered = true;
        }
        if response.stale {
            let rejected = self.sequence;
            self.sequence = self.sequence.max(wall_clock_micros());
            warn!("Heartbeat {} stale, continuing from {}", rejected, self.sequence);
        }
        self.apply_config(&response);
        Ok(response)
    }

    fn apply_config(&mut self, response: &HeartbeatResponse) {
        if response.config_version <= self.config_version {
            return;
        }
        for delta in &response.config_deltas {
            if delta.name == HEARTBEAT_INTERVAL_FLAG {
                match delta.value.parse::<u64>() {
                    Ok(ms) if ms > 0 => self.interval = Duration::from_millis(ms),
                    _ => warn!("Ignoring bad {} value {}", delta.name, delta.value),
                }
            }
            self.flags.insert(delta.name.clone(), delta.value.clone());
        }
        self.config_version = response.config_version;
    }

    /// Heartbeat until `shutdown_rx` fires or closes. Failures are logged
    /// and retried on the next tick.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            "Heartbeating {} to {} every {:?}",
            self.registration.node_id,
            self.client.target(),
            self.interval
        );
        if let Err(e) = self.register().await {
            warn!("Registration failed, will register with heartbeats: {}", e);
        }
        self.reported_status = ReportedStatus::Serving;

        // spread members restarted together across the period
        let jitter = start_jitter(self.interval);
        let mut ticker = time::interval_at(time::Instant::now() + jitter, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!("Heartbeat to {} failed: {}", self.client.target(), e);
                    }
                    if ticker.period() != self.interval {
                        info!("Heartbeat interval now {:?}", self.interval);
                        ticker = time::interval_at(
                            time::Instant::now() + self.interval,
                            self.interval,
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Heartbeater for {} stopping", self.registration.node_id);
                    break;
                }
            }
        }
    }
}

fn start_jitter(interval: Duration) -> Duration {
    let max_ms = interval.as_millis().min(u128::from(u64::MAX)) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
