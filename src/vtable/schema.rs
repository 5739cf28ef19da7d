//! Relation schemas and the wire contracts drivers depend on
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{MeridianError, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum DataType {
    Text,
    Inet,
    Uuid,
    Int32,
    Blob,
    Set(Box<DataType>),
    Map(Box<DataType>, Box<DataType>),
}

impl DataType {
    pub fn set_of(element: DataType) -> Self {
        DataType::Set(Box::new(element))
    }

    pub fn map_of(key: DataType, value: DataType) -> Self {
        DataType::Map(Box::new(key), Box::new(value))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Text => write!(f, "text"),
            DataType::Inet => write!(f, "inet"),
            DataType::Uuid => write!(f, "uuid"),
            DataType::Int32 => write!(f, "int"),
            DataType::Blob => write!(f, "blob"),
            DataType::Set(element) => write!(f, "set<{}>", element),
            DataType::Map(key, value) => write!(f, "map<{}, {}>", key, value),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub is_hash_key: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
}

impl Schema {
    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Fail with `SchemaMismatch` unless the columns are exactly `contract`,
    /// in order, with the same types.
    pub fn verify_contract(&self, table: &str, contract: &[(&str, &str)]) -> Result<()> {
        if self.columns.len() != contract.len() {
            return Err(MeridianError::SchemaMismatch(format!(
                "{} has {} columns, drivers expect {}",
                table,
                self.columns.len(),
                contract.len()
            )));
        }
        for (position, (column, (name, type_name))) in
            self.columns.iter().zip(contract.iter()).enumerate()
        {
            let actual_type = column.data_type.to_string();
            if column.name != *name || actual_type != *type_name {
                return Err(MeridianError::SchemaMismatch(format!(
                    "{} column {} is {} {}, drivers expect {} {}",
                    table, position, column.name, actual_type, name, type_name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<ColumnSchema>,
    names: HashSet<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, data_type: DataType, is_hash_key: bool) -> Result<&mut Self> {
        if !self.names.insert(name.to_string()) {
            return Err(MeridianError::SchemaMismatch(format!(
                "duplicate column {}",
                name
            )));
        }
        self.columns.push(ColumnSchema {
            name: name.to_string(),
            data_type,
            is_hash_key,
        });
        Ok(self)
    }

    pub fn add_hash_key_column(&mut self, name: &str, data_type: DataType) -> Result<&mut Self> {
        self.push(name, data_type, true)
    }

    pub fn add_column(&mut self, name: &str, data_type: DataType) -> Result<&mut Self> {
        self.push(name, data_type, false)
    }

    pub fn build(self) -> Schema {
        Schema {
            columns: self.columns,
        }
    }
}

/// Column layouts client drivers are built against. Changing these breaks
/// drivers.
pub mod contract {
    pub const PEERS: &[(&str, &str)] = &[
        ("peer", "inet"),
        ("data_center", "text"),
        ("rack", "text"),
        ("release_version", "text"),
        ("rpc_address", "inet"),
        ("schema_version", "uuid"),
        ("tokens", "set<text>"),
        ("host_id", "uuid"),
    ];

    pub const LOCAL: &[(&str, &str)] = &[
        ("key", "text"),
        ("bootstrapped", "text"),
        ("broadcast_address", "inet"),
        ("cluster_name", "text"),
        ("cql_version", "text"),
        ("data_center", "text"),
        ("gossip_generation", "int"),
        ("host_id", "uuid"),
        ("listen_address", "inet"),
        ("native_protocol_version", "text"),
        ("partitioner", "text"),
        ("rack", "text"),
        ("release_version", "text"),
        ("rpc_address", "inet"),
        ("schema_version", "uuid"),
        ("thrift_version", "text"),
        ("tokens", "set<text>"),
        ("truncated_at", "map<uuid, blob>"),
    ];
}
