//! OAuth Authorization Bridge - Entry Point

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use oauth_bridge::{config::Config, server::BridgeServer};

#[derive(Parser, Debug)]
#[command(name = "oauth-bridge")]
#[command(about = "OAuth 2.0 PKCE bridge in front of an upstream OpenID Connect provider")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8000", env = "PORT")]
    port: u16,

    /// Public base URL of this server (overrides BASE_URL from the environment)
    #[arg(long)]
    base_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting OAuth bridge");

    let config = Config::from_env_with_base_url(cli.base_url)?;
    tracing::info!(
        required_domain = ?config.required_domain,
        redirect_patterns = config.redirect_patterns.len(),
        "Configuration loaded"
    );

    BridgeServer::new(&config)?.run_http(cli.port).await
}
