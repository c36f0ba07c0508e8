//! Client binary: `tavern-client [server_addr]`.
//!
//! Reads commands from stdin and prints everything the client emits,
//! server lines and status lines alike.

use tavern_client::{ClientConfig, ClientError, ReconnectingClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7000".to_string());

    let (client, mut events) =
        ReconnectingClient::new(&addr, ClientConfig::default());
    client.connect().await?;

    tokio::spawn(async move {
        while let Some(line) = events.recv().await {
            println!("{line}");
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = client.exited() => break,
            line = input.next_line() => match line {
                Ok(Some(line)) => client.handle_command(line.trim()).await,
                Ok(None) | Err(_) => {
                    client.handle_command("exit").await;
                    break;
                }
            },
        }
    }
    Ok(())
}
