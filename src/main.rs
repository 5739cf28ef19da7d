use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meridian::api;
use meridian::cli;
use meridian::node::MembershipNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args and env vars
    let args = cli::Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "meridian=debug,tower_http=debug".into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let settings = args.into_settings();
    let socket_address = settings.http_bind_addr()?;

    // Schema mismatches and bad settings stop startup here
    let node = Arc::new(MembershipNode::new(settings).await?);
    let handle = node.start();

    // Build Axum Router
    let api = api::api(node.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    info!(
        "Starting Meridian node {} on {} (heartbeats on {})",
        node.node_id(),
        listener.local_addr()?,
        node.heartbeat_addr()
    );
    axum::serve(
        listener,
        api.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
