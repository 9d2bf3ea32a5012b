use std::sync::Arc;

use clap::Parser;
use ed25519_dalek::SigningKey;
use hoard::Config;
use hoard::Node;
use hoard::NodeParams;
use hoard::server;
use hoard_swarm::MemRealm;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Peer-to-peer content-addressed blob cache.
#[derive(Parser)]
#[command(name = "hoard", version)]
struct Args {
    /// HTTP listen address (overrides HOARD_HTTP_ADDR).
    #[arg(long)]
    http_addr: Option<String>,

    /// Data directory (overrides HOARD_DATA_DIR).
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hoard=info")))
        .init();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(addr) = args.http_addr {
        config.http_addr = addr;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(redb::Database::create(config.data_dir.join("hoard.redb"))?);
    let signing_key = load_identity(&config.data_dir)?;

    // The binary runs a standalone cache; an embedding application wires in
    // a real peer transport through the AskSwarm contract.
    let realm = MemRealm::new();
    let swarm = Arc::new(realm.swarm(signing_key.clone()));

    let node = Node::new(NodeParams {
        config: config.clone(),
        db,
        swarm,
        signing_key,
    })
    .await?;
    node.start();
    info!(local = %node.local_id(), "node running");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
        shutdown.cancel();
    });

    server::serve(node.clone(), &config.http_addr, cancel).await?;
    node.shutdown();
    Ok(())
}

/// Loads the node's long-term key, generating one on first start.
fn load_identity(data_dir: &std::path::Path) -> std::io::Result<SigningKey> {
    let path = data_dir.join("identity");
    match std::fs::read(&path) {
        Ok(bytes) if bytes.len() == 32 => {
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&secret))
        }
        _ => {
            let secret: [u8; 32] = rand::random();
            let key = SigningKey::from_bytes(&secret);
            std::fs::write(&path, key.to_bytes())?;
            Ok(key)
        }
    }
}
