//! system.peers
//!
//! One row per peer other than the requester, addressed the way the caller
//! can reach it. An anonymous request is answered as if the serving node
//! asked, so that node never lists itself.
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use uuid::Uuid;

use super::paging::{PagingState, RowKey};
use super::row::{QlValue, RowBlock};
use super::schema::{DataType, Schema, SchemaBuilder};
use super::tokens::TokenRing;
use super::{ReadRequest, ReadResponse, DEFAULT_SCHEMA_VERSION};
use crate::error::Result;
use crate::membership::directory::{DirectorySnapshot, PeerDirectory};
use crate::membership::record::{PeerRecord, PeerStatus};
use crate::node::NodeId;
use crate::resolver::Resolver;

#[derive(Debug)]
pub struct PeersVTable {
    directory: Arc<PeerDirectory>,
    resolver: Resolver,
    local_id: NodeId,
    schema: Schema,
}

impl PeersVTable {
    pub const NAME: &'static str = "system.peers";

    pub fn new(
        directory: Arc<PeerDirectory>,
        resolver: Resolver,
        local_id: NodeId,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            resolver,
            local_id,
            schema: Self::create_schema()?,
        })
    }

    pub fn create_schema() -> Result<Schema> {
        let mut builder = SchemaBuilder::new();
        builder
            .add_hash_key_column("peer", DataType::Inet)?
            .add_column("data_center", DataType::Text)?
            .add_column("rack", DataType::Text)?
            .add_column("release_version", DataType::Text)?
            .add_column("rpc_address", DataType::Inet)?
            .add_column("schema_version", DataType::Uuid)?
            .add_column("tokens", DataType::set_of(DataType::Text))?
            .add_column("host_id", DataType::Uuid)?;
        Ok(builder.build())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn retrieve_data(&self, request: &ReadRequest) -> Result<ReadResponse> {
        let snapshot = self.directory.snapshot();
        let now = snapshot.taken_at;
        self.materialize(&snapshot, request, now)
    }

    fn is_eligible(&self, record: &PeerRecord, request: &ReadRequest, now: Instant) -> bool {
        if request.requester.unwrap_or(self.local_id) == record.node_id {
            return false;
        }
        if record.status == PeerStatus::Bootstrapping {
            return false;
        }
        !record.is_tombstone_expired(now, self.directory.config().tombstone_retention)
    }

    /// Build one page of rows from `snapshot`, judging tombstones at `now`
    pub fn materialize(
        &self,
        snapshot: &DirectorySnapshot,
        request: &ReadRequest,
        now: Instant,
    ) -> Result<ReadResponse> {
        let limit = request.validated_limit()?;
        if let Some(state) = &request.paging_state {
            state.check_table(Self::NAME)?;
        }
        let caller = request.caller_context(snapshot);
        let retention = self.directory.config().tombstone_retention;
        let ring = TokenRing::new(snapshot, now, retention);

        let mut entries: Vec<(RowKey, &PeerRecord)> = Vec::with_capacity(snapshot.len());
        for record in snapshot.records() {
            if !self.is_eligible(record, request, now) {
                continue;
            }
            match self.resolver.resolve(record, &caller) {
                Ok(address) => entries.push((
                    RowKey {
                        address,
                        host_id: record.node_id,
                    },
                    &**record,
                )),
                Err(e) => warn!("Omitting peer from {}: {}", Self::NAME, e),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let total = entries.len();

        let start = match &request.paging_state {
            Some(state) => entries.partition_point(|(key, _)| *key <= state.last_key),
            None => 0,
        };
        let end = match limit {
            Some(limit) => total.min(start.saturating_add(limit)),
            None => total,
        };

        let mut rows = RowBlock::new(self.schema.clone());
        for (key, record) in entries.iter().take(end).skip(start) {
            let tokens = ring.tokens(record);
            rows.extend()
                .set("peer", QlValue::Inet(record.primary.ip()))?
                .set("data_center", QlValue::text(&record.placement.data_center))?
                .set("rack", QlValue::text(&record.placement.rack))?
                .set("release_version", QlValue::text(&record.release_version))?
                .set("rpc_address", QlValue::Inet(key.address.ip()))?
                .set("schema_version", QlValue::Uuid(Uuid::from_u128(DEFAULT_SCHEMA_VERSION)))?
                .set("tokens", QlValue::text_set(tokens))?
                .set("host_id", QlValue::Uuid(*record.node_id.as_uuid()))?;
        }

        let paging_state = if end < total && end > start {
            Some(PagingState {
                table: Self::NAME.to_string(),
                last_key: entries[end - 1].0,
                snapshot_version: snapshot.version,
            })
        } else {
            None
        };
        debug!(
            "{} page: {} of {} rows, more={}",
            Self::NAME,
            rows.len(),
            total,
            paging_state.is_some()
        );
        Ok(ReadResponse { rows, paging_state })
    }
}
