use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cli::{APP_NAME, APP_VERSION};
use crate::node::{MembershipNode, NodeId, NodeStats};

use super::SharedNode;

// basic handler that responds with a static string
pub async fn root() -> &'static str {
    "Welcome to Meridian"
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AboutResponse {
    pub name: String,
    pub version: String,
    pub node_id: NodeId,
    pub data_center: String,
    pub rack: String,
}

impl AboutResponse {
    fn for_node(node: &MembershipNode) -> Self {
        let settings = node.settings();
        Self {
            name: APP_NAME.to_string(),
            version: APP_VERSION.to_string(),
            node_id: node.node_id(),
            data_center: settings.data_center.clone(),
            rack: settings.rack.clone(),
        }
    }
}

#[instrument(skip(node))]
pub async fn about(State(node): State<SharedNode>) -> axum::Json<AboutResponse> {
    axum::Json(AboutResponse::for_node(&node))
}

#[instrument(skip(node), level = "debug")]
pub async fn stats(State(node): State<SharedNode>) -> axum::Json<NodeStats> {
    axum::Json(node.stats())
}
