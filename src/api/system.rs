//! Reads of the system relations
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::SharedNode;
use crate::error::Result;
use crate::vtable::{
    ColumnSchema, LocalVTable, PagingState, PeersVTable, QlValue, ReadRequest, ReadResponse,
};

#[derive(Debug, Deserialize, Serialize)]
pub struct TableResponse {
    pub columns: Vec<ColumnSchema>,
    pub rows: Vec<Vec<QlValue>>,
    pub paging_state: Option<PagingState>,
}

impl From<ReadResponse> for TableResponse {
    fn from(response: ReadResponse) -> Self {
        Self {
            columns: response.rows.schema().columns().to_vec(),
            rows: response
                .rows
                .rows()
                .iter()
                .map(|row| row.values().to_vec())
                .collect(),
            paging_state: response.paging_state,
        }
    }
}

async fn read(
    node: SharedNode,
    table: &str,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: ReadRequest,
) -> Result<axum::Json<TableResponse>> {
    if let Some(ConnectInfo(addr)) = connect_info {
        request.remote = Some(addr.ip());
    }
    let response = node.read_table(table, request).await?;
    Ok(axum::Json(response.into()))
}

#[instrument(skip(node, connect_info), level = "debug")]
pub async fn peers(
    State(node): State<SharedNode>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    axum::Json(request): axum::Json<ReadRequest>,
) -> Result<axum::Json<TableResponse>> {
    read(node, PeersVTable::NAME, connect_info, request).await
}

#[instrument(skip(node, connect_info), level = "debug")]
pub async fn local(
    State(node): State<SharedNode>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    axum::Json(request): axum::Json<ReadRequest>,
) -> Result<axum::Json<TableResponse>> {
    read(node, LocalVTable::NAME, connect_info, request).await
}
