//! schedule-enforcer - HTTP Server Entry Point
//!
//! Starts the schedule engine and the HTTP server that feeds it.

use schedule_enforcer::{api, Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schedule_enforcer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: database={}, vision backend {}",
        config.database_path.display(),
        if config.groq_api_key.is_some() {
            "configured"
        } else {
            "NOT CONFIGURED - verdicts will be mocked"
        }
    );

    // Start HTTP server + schedule engine
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting server on {}", addr);

    api::serve(config).await?;

    Ok(())
}
