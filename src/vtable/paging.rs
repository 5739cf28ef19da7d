//! Continuation tokens for paged reads
//!
//! Rows are emitted in ascending [`RowKey`] order. A page ends with the key
//! of its last row; the next page starts strictly after it, so a row is
//! never returned twice across pages of one scan.
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::membership::messages::{decode_config, wire_config};
use crate::node::NodeId;

/// Ordering key of a row: resolved endpoint, then host id.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub address: SocketAddr,
    pub host_id: NodeId,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PagingState {
    pub table: String,
    pub last_key: RowKey,
    /// Directory version the scan started from
    pub snapshot_version: u64,
}

impl PagingState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, wire_config())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (state, _) = bincode::serde::decode_from_slice(bytes, decode_config())?;
        Ok(state)
    }

    /// Reject a token issued for a different relation
    pub fn check_table(&self, table: &str) -> Result<()> {
        if self.table != table {
            return Err(crate::api_error!(
                "paging state belongs to {}, not {}",
                self.table,
                table
            ));
        }
        Ok(())
    }
}
