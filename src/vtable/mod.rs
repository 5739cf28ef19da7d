//! System relations served from the membership directory
//!
//! The set of relations is closed: [`SystemTable`] names every one of them
//! and [`SystemTables`] dispatches by name. Each relation owns its schema
//! and its resolver; reads only ever see a directory snapshot.
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};
use crate::membership::directory::{DirectorySnapshot, PeerDirectory};
use crate::membership::record::Placement;
use crate::node::NodeId;
use crate::resolver::{CallerContext, Resolver};

pub mod local;
pub mod paging;
pub mod peers;
pub mod row;
pub mod schema;
pub mod tokens;

pub use local::LocalVTable;
pub use paging::{PagingState, RowKey};
pub use peers::PeersVTable;
pub use row::{QlValue, Row, RowBlock};
pub use schema::{ColumnSchema, DataType, Schema};

/// Schema version reported for every node; schemas are not versioned here.
pub const DEFAULT_SCHEMA_VERSION: u128 = 0;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadRequest {
    /// Node the client is connected through
    pub requester: Option<NodeId>,
    pub caller_data_center: Option<String>,
    pub caller_rack: Option<String>,
    #[serde(skip)]
    pub remote: Option<IpAddr>,
    pub limit: Option<usize>,
    pub paging_state: Option<PagingState>,
}

impl ReadRequest {
    pub fn validated_limit(&self) -> Result<Option<usize>> {
        match self.limit {
            Some(0) => Err(crate::api_error!("limit must be positive")),
            limit => Ok(limit),
        }
    }

    /// A known requester's placement wins over what the request claims
    pub fn caller_context(&self, snapshot: &DirectorySnapshot) -> CallerContext {
        let placement = self
            .requester
            .and_then(|id| snapshot.get(&id))
            .map(|record| record.placement.clone())
            .or_else(|| {
                self.caller_data_center.as_ref().map(|dc| {
                    Placement::new(dc.clone(), self.caller_rack.clone().unwrap_or_default())
                })
            });
        CallerContext {
            placement,
            remote: self.remote,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ReadResponse {
    pub rows: RowBlock,
    pub paging_state: Option<PagingState>,
}

#[derive(Debug)]
pub enum SystemTable {
    Peers(PeersVTable),
    Local(LocalVTable),
}

impl SystemTable {
    pub fn name(&self) -> &'static str {
        match self {
            SystemTable::Peers(_) => PeersVTable::NAME,
            SystemTable::Local(_) => LocalVTable::NAME,
        }
    }

    pub fn schema(&self) -> &Schema {
        match self {
            SystemTable::Peers(table) => table.schema(),
            SystemTable::Local(table) => table.schema(),
        }
    }

    /// Column layout drivers expect from this relation
    pub fn contract(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            SystemTable::Peers(_) => schema::contract::PEERS,
            SystemTable::Local(_) => schema::contract::LOCAL,
        }
    }

    pub fn retrieve_data(&self, request: &ReadRequest) -> Result<ReadResponse> {
        match self {
            SystemTable::Peers(table) => table.retrieve_data(request),
            SystemTable::Local(table) => table.retrieve_data(request),
        }
    }
}

#[derive(Debug, Default)]
pub struct SystemTables {
    tables: BTreeMap<&'static str, Arc<SystemTable>>,
}

impl SystemTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// The peers and local relations over one directory
    pub fn standard(
        directory: Arc<PeerDirectory>,
        resolver: Resolver,
        local_id: NodeId,
    ) -> Result<Self> {
        let mut tables = Self::new();
        tables.register(SystemTable::Peers(PeersVTable::new(
            directory.clone(),
            resolver,
            local_id,
        )?))?;
        tables.register(SystemTable::Local(LocalVTable::new(
            directory, resolver, local_id,
        )?))?;
        Ok(tables)
    }

    /// Add a relation after checking its schema against the driver contract
    pub fn register(&mut self, table: SystemTable) -> Result<()> {
        let name = table.name();
        if self.tables.contains_key(name) {
            return Err(MeridianError::SchemaMismatch(format!(
                "{} registered twice",
                name
            )));
        }
        table.schema().verify_contract(name, table.contract())?;
        self.tables.insert(name, Arc::new(table));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SystemTable>> {
        self.tables.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
