mod base;
pub mod directory;
pub mod system;

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use base::AboutResponse;
pub use directory::{DirectoryListing, FlagsUpdated, PeerView, SetFlag};
pub use system::TableResponse;

use crate::node::MembershipNode;

pub type SharedNode = Arc<MembershipNode>;

/// Build the HTTP API over a running membership node
pub fn api(node: SharedNode) -> Router {
    Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        .route(paths::base::STATS, routing::get(base::stats))
        // System relations
        .route(paths::system::PEERS, routing::post(system::peers))
        .route(paths::system::LOCAL, routing::post(system::local))
        // Directory administration
        .route(paths::DIRECTORY, routing::get(directory::list))
        .route(paths::FLAGS, routing::post(directory::set_flag))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}
