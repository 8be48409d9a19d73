// ABOUTME: Entry point for the Cloudinary apple upload service
// ABOUTME: Loads config, builds the media client and serves until terminated

mod config;
mod error;
mod handlers;
mod media;
mod server;
mod signal;

use crate::config::Config;
use crate::handlers::AppState;
use crate::media::{cloudinary::CloudinaryClient, MediaService};
use crate::server::HttpListener;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cloudinary_apple=info".parse()?),
        )
        .init();

    if let Err(e) = dotenv::from_filename(".env") {
        warn!("Error loading .env file: {}", e);
    }

    let config = Config::from_env()?;

    // Bad credentials only show up as failed uploads
    if let Err(e) = config.credentials.validate() {
        warn!("Cloudinary credentials: {}", e);
    }

    info!(signature_algorithm = %config.signature_algorithm, "Signing uploads");

    let media: Arc<dyn MediaService> = Arc::new(CloudinaryClient::new(
        config.credentials.clone(),
        &config.upload_prefix,
        &config.delivery_prefix,
    )
    .with_signature_algorithm(config.signature_algorithm));
    let state = Arc::new(AppState {
        media,
        operation_timeout: config.operation_budget(),
    });
    let app = handlers::router(state, config.limits.write_timeout);

    let listener = HttpListener::bind(&config.bind_address(), app, config.limits.clone()).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP server");
    info!(
        "Running on port: {}, http://localhost:{}/",
        config.port, config.port
    );

    listener.serve(signal::graceful_shutdown()).await
}
