use std::time::Duration;
use treegate::{Config, start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treegate=info".into()),
        )
        .init();

    let config = Config::from_env();

    // Start the server in a background task so we can listen for Ctrl-C in the main task
    let server_task = tokio::spawn(async move {
        if let Err(e) = start_server(config).await {
            eprintln!("server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("shutdown requested, stopping server...");

    server_task.abort();
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("server stopped");
    Ok(())
}
