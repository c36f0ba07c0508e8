//! Server binary: `tavern [bind_addr]`.

use tavern::{BcryptHasher, TavernError, TavernServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), TavernError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind_addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7000".to_string());

    let server = TavernServer::builder()
        .bind_addr(bind_addr)
        .build(BcryptHasher::default())
        .await?;
    tracing::info!(addr = %server.local_addr().map(|a| a.to_string()).unwrap_or_default(), "server ready");
    server.run().await
}
