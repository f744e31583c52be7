//! # Chat Relay
//!
//! Thin entry point that delegates to lib-web for server setup.

use lib_web::{start_server, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| defaults.bind_address.clone()),
        ..defaults
    };

    start_server(config).await
}
