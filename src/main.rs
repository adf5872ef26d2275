use anyhow::Context;
use clap::Parser;
use docvec::{api, config, logging, processing::EmbeddingService};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::net::TcpListener;

const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;

#[derive(Parser)]
#[command(name = "docvec", about = "Batch document embedding service")]
struct Cli {
    /// Port to listen on; overrides SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("invalid configuration")?;
    logging::init_tracing();
    tracing::debug!(
        file_storage_url = %config.file_storage_url,
        embeddings_table = %config.embeddings_table,
        vector_store = ?config.vector_store_driver,
        auth_provider = ?config.auth_provider,
        embedding_provider = ?config.embedding_provider,
        "Loaded configuration"
    );

    let service = EmbeddingService::from_config(config).await?;
    let app = api::create_router(Arc::new(service), &config.api_key_header);

    let (listener, port) = bind_listener(cli.port.or(config.server_port))
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
