use clap::Parser;
use log::{error, info};
use server::network::{RelayServer, ServerConfig, DEFAULT_OUTBOUND_QUEUE_CAPACITY};

/// Main-method of the relay server.
/// Parses command-line arguments, binds the listener and accepts until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
        port: u16,
        /// Records each client may have queued before new ones are dropped
        #[clap(short, long, default_value_t = DEFAULT_OUTBOUND_QUEUE_CAPACITY)]
        queue_capacity: usize,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        outbound_queue_capacity: args.queue_capacity,
        ..ServerConfig::default()
    };
    let server = RelayServer::bind(config).await?;
    let registry = server.registry();

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(
                "Received Ctrl+C, shutting down with {} sessions connected",
                registry.len().await
            );
        }
    }

    Ok(())
}
