use clap::{Parser, Subcommand};
use reqwest::Client;
use std::net::SocketAddr;

use meridian::api::{paths, DirectoryListing, FlagsUpdated, SetFlag, TableResponse};
use meridian::node::NodeId;
use meridian::vtable::ReadRequest;

#[derive(Parser)]
#[command(name = "meridian-admin")]
#[command(about = "Meridian membership administration tool")]
struct Cli {
    /// HTTP address of the node to talk to
    #[arg(long, default_value = "127.0.0.1:8510", env("MERIDIAN_ADMIN_NODE"))]
    node: SocketAddr,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read system.peers, following paging to the end
    Peers {
        /// Node the client is connected through
        #[arg(long)]
        requester: Option<NodeId>,
        /// Data center of the caller when the requester is unknown
        #[arg(long)]
        data_center: Option<String>,
        /// Rows per page
        #[arg(long, default_value = "100")]
        page_size: usize,
    },
    /// Read system.local
    Local {
        #[arg(long)]
        requester: Option<NodeId>,
    },
    /// List every directory record
    Directory,
    /// Set a runtime flag pushed to members with their next heartbeat
    SetFlag { name: String, value: String },
    /// Check health of nodes (e.g., "127.0.0.1:8510,127.0.0.1:8520")
    Health {
        #[arg(long)]
        nodes: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Peers {
            requester,
            data_center,
            page_size,
        } => {
            let request = ReadRequest {
                requester,
                caller_data_center: data_center,
                limit: Some(page_size),
                ..ReadRequest::default()
            };
            read_all(&client, cli.node, paths::system::PEERS, request).await?;
        }
        Commands::Local { requester } => {
            let request = ReadRequest {
                requester,
                ..ReadRequest::default()
            };
            read_all(&client, cli.node, paths::system::LOCAL, request).await?;
        }
        Commands::Directory => list_directory(&client, cli.node).await?,
        Commands::SetFlag { name, value } => {
            let url = format!("http://{}{}", cli.node, paths::FLAGS);
            let updated: FlagsUpdated = client
                .post(url)
                .json(&SetFlag { name, value })
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("config version {}", updated.config_version);
        }
        Commands::Health { nodes } => check_health(&client, &nodes).await?,
    }

    Ok(())
}

async fn read_all(
    client: &Client,
    node: SocketAddr,
    path: &str,
    mut request: ReadRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("http://{}{}", node, path);
    let mut header_printed = false;
    let mut total = 0usize;
    loop {
        let page: TableResponse = client
            .post(&url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !header_printed {
            let names: Vec<&str> = page.columns.iter().map(|c| c.name.as_str()).collect();
            println!("{}", names.join(" | "));
            header_printed = true;
        }
        for row in &page.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            println!("{}", cells.join(" | "));
        }
        total += page.rows.len();
        match page.paging_state {
            Some(state) => request.paging_state = Some(state),
            None => break,
        }
    }
    println!("({} rows)", total);
    Ok(())
}

async fn list_directory(
    client: &Client,
    node: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("http://{}{}", node, paths::DIRECTORY);
    let listing: DirectoryListing = client.get(url).send().await?.error_for_status()?.json().await?;
    println!("directory version {}", listing.version);
    for peer in listing.peers {
        println!(
            "{} {} {}/{} seq={} primary={} broadcast={} updated={}",
            peer.node_id,
            peer.status,
            peer.placement.data_center,
            peer.placement.rack,
            peer.sequence,
            peer.primary,
            peer.broadcast
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            peer.last_updated.to_rfc3339()
        );
    }
    Ok(())
}

fn parse_nodes(nodes: &str) -> Result<Vec<SocketAddr>, Box<dyn std::error::Error>> {
    nodes
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SocketAddr>().map_err(|e| Box::new(e) as Box<dyn std::error::Error>))
        .collect()
}

async fn check_health(client: &Client, nodes: &str) -> Result<(), Box<dyn std::error::Error>> {
    for node in parse_nodes(nodes)? {
        let url = format!("http://{}{}", node, paths::base::HEALTH);
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => println!("{} healthy", node),
            Ok(response) => println!("{} returned HTTP {}", node, response.status()),
            Err(e) => println!("{} unreachable ({})", node, e),
        }
    }
    Ok(())
}
