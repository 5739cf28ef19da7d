//! Directory listing and runtime flags
use std::collections::BTreeSet;
use std::net::SocketAddr;

use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::SharedNode;
use crate::error::Result;
use crate::membership::record::{PeerRecord, PeerStatus, Placement, ReportedStatus, TabletSummary};
use crate::node::NodeId;

#[derive(Debug, Deserialize, Serialize)]
pub struct PeerView {
    pub node_id: NodeId,
    pub primary: SocketAddr,
    pub broadcast: Option<SocketAddr>,
    pub placement: Placement,
    pub status: PeerStatus,
    pub reported_status: ReportedStatus,
    pub tablet_summary: TabletSummary,
    pub sequence: u64,
    pub tokens: BTreeSet<String>,
    pub release_version: String,
    pub last_updated: DateTime<Utc>,
}

impl From<&PeerRecord> for PeerView {
    fn from(record: &PeerRecord) -> Self {
        Self {
            node_id: record.node_id,
            primary: record.primary,
            broadcast: record.broadcast,
            placement: record.placement.clone(),
            status: record.status,
            reported_status: record.reported_status,
            tablet_summary: record.tablet_summary,
            sequence: record.sequence,
            tokens: record.tokens.clone(),
            release_version: record.release_version.clone(),
            last_updated: record.last_updated,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DirectoryListing {
    pub version: u64,
    pub peers: Vec<PeerView>,
}

#[instrument(skip(node), level = "debug")]
pub async fn list(State(node): State<SharedNode>) -> axum::Json<DirectoryListing> {
    let snapshot = node.snapshot();
    axum::Json(DirectoryListing {
        version: snapshot.version,
        peers: snapshot.records().iter().map(|r| PeerView::from(&**r)).collect(),
    })
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetFlag {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FlagsUpdated {
    pub config_version: u64,
}

#[instrument(skip(node))]
pub async fn set_flag(
    State(node): State<SharedNode>,
    axum::Json(flag): axum::Json<SetFlag>,
) -> Result<axum::Json<FlagsUpdated>> {
    if flag.name.trim().is_empty() {
        return Err(crate::api_error!("flag name must not be empty"));
    }
    let config_version = node.receiver().set_flag(flag.name.clone(), flag.value.clone());
    info!(
        "Flag {}={} set, config version {}",
        flag.name, flag.value, config_version
    );
    Ok(axum::Json(FlagsUpdated { config_version }))
}
