//! system.local
//!
//! A single row describing the node the client is connected to.
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;
use uuid::Uuid;

use super::row::{QlValue, RowBlock};
use super::schema::{DataType, Schema, SchemaBuilder};
use super::tokens::TokenRing;
use super::{ReadRequest, ReadResponse, DEFAULT_SCHEMA_VERSION};
use crate::error::Result;
use crate::membership::directory::{DirectorySnapshot, PeerDirectory};
use crate::node::NodeId;
use crate::resolver::Resolver;

pub const CLUSTER_NAME: &str = "local cluster";
pub const CQL_VERSION: &str = "3.4.2";
pub const NATIVE_PROTOCOL_VERSION: &str = "4";
pub const PARTITIONER: &str = "org.apache.cassandra.dht.Murmur3Partitioner";
pub const THRIFT_VERSION: &str = "20.1.0";

#[derive(Debug)]
pub struct LocalVTable {
    directory: Arc<PeerDirectory>,
    resolver: Resolver,
    local_id: NodeId,
    schema: Schema,
}

impl LocalVTable {
    pub const NAME: &'static str = "system.local";

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
            .add_hash_key_column("key", DataType::Text)?
            .add_column("bootstrapped", DataType::Text)?
            .add_column("broadcast_address", DataType::Inet)?
            .add_column("cluster_name", DataType::Text)?
            .add_column("cql_version", DataType::Text)?
            .add_column("data_center", DataType::Text)?
            .add_column("gossip_generation", DataType::Int32)?
            .add_column("host_id", DataType::Uuid)?
            .add_column("listen_address", DataType::Inet)?
            .add_column("native_protocol_version", DataType::Text)?
            .add_column("partitioner", DataType::Text)?
            .add_column("rack", DataType::Text)?
            .add_column("release_version", DataType::Text)?
            .add_column("rpc_address", DataType::Inet)?
            .add_column("schema_version", DataType::Uuid)?
            .add_column("thrift_version", DataType::Text)?
            .add_column("tokens", DataType::set_of(DataType::Text))?
            .add_column(
                "truncated_at",
                DataType::map_of(DataType::Uuid, DataType::Blob),
            )?;
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

    /// The requester's row, or this node's own when no requester is named.
    /// Empty when that node is not in the directory or has no address the
    /// caller can reach.
    pub fn materialize(
        &self,
        snapshot: &DirectorySnapshot,
        request: &ReadRequest,
        now: Instant,
    ) -> Result<ReadResponse> {
        request.validated_limit()?;
        let mut rows = RowBlock::new(self.schema.clone());
        let target = request.requester.unwrap_or(self.local_id);
        let record = match snapshot.get(&target) {
            Some(record) => record,
            None => {
                return Ok(ReadResponse {
                    rows,
                    paging_state: None,
                })
            }
        };

        let caller = request.caller_context(snapshot);
        let rpc_address = match self.resolver.resolve(record, &caller) {
            Ok(address) => address,
            Err(e) => {
                warn!("Omitting row from {}: {}", Self::NAME, e);
                return Ok(ReadResponse {
                    rows,
                    paging_state: None,
                });
            }
        };
        let ring = TokenRing::new(snapshot, now, self.directory.config().tombstone_retention);

        rows.extend()
            .set("key", QlValue::text("local"))?
            .set("bootstrapped", QlValue::text("COMPLETED"))?
            .set("broadcast_address", QlValue::Inet(rpc_address.ip()))?
            .set("cluster_name", QlValue::text(CLUSTER_NAME))?
            .set("cql_version", QlValue::text(CQL_VERSION))?
            .set("data_center", QlValue::text(&record.placement.data_center))?
            .set("gossip_generation", QlValue::Int32(0))?
            .set("host_id", QlValue::Uuid(*record.node_id.as_uuid()))?
            .set("listen_address", QlValue::Inet(record.primary.ip()))?
            .set("native_protocol_version", QlValue::text(NATIVE_PROTOCOL_VERSION))?
            .set("partitioner", QlValue::text(PARTITIONER))?
            .set("rack", QlValue::text(&record.placement.rack))?
            .set("release_version", QlValue::text(&record.release_version))?
            .set("rpc_address", QlValue::Inet(rpc_address.ip()))?
            .set("schema_version", QlValue::Uuid(Uuid::from_u128(DEFAULT_SCHEMA_VERSION)))?
            .set("thrift_version", QlValue::text(THRIFT_VERSION))?
            .set("tokens", QlValue::text_set(ring.tokens(record)))?;

        Ok(ReadResponse {
            rows,
            paging_state: None,
        })
    }
}
