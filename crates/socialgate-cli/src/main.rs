//! `socialgate` binary: loads configuration and serves the gateway.

use clap::{Parser, Subcommand, ValueEnum};
use socialgate_core::{BackendDomain, GatewayConfig};
use socialgate_gateway::GatewayServer;
use socialgate_security::connect_counter_store;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "socialgate", about = "socialgate - API gateway for the social platform services")]
struct Cli {
    /// Path to config file (optional; environment variables are enough)
    #[arg(short, long, default_value = "socialgate.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config and GATEWAY_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the resolved backend table and exit
    Routes,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Defaults, then the TOML file if it exists, then the environment.
fn load_config<F>(path: &Path, lookup: F) -> anyhow::Result<GatewayConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        GatewayConfig::from_toml_str(&raw)?
    } else {
        info!(path = %path.display(), "No config file, using defaults and environment");
        GatewayConfig::default()
    };
    config.apply_env(lookup)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = load_config(&cli.config, |key| std::env::var(key).ok())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            let config = Arc::new(config);

            info!(
                rate_limit = ?config.admission.rate_limit,
                concurrency = ?config.admission.concurrency,
                counter_store = ?config.admission.counter_store,
                proxy_timeout_secs = config.proxy.timeout_secs,
                search_deadline_secs = config.search.deadline_secs,
                "Configuration loaded"
            );

            let store = connect_counter_store(&config.admission).await?;
            let app = GatewayServer::build(&config, store)?;

            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("socialgate listening on {}", addr);
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
        }
        Commands::Routes => {
            config.validate()?;
            for domain in BackendDomain::ALL {
                println!(
                    "{:<14} -> {}",
                    domain.prefix(),
                    config.backends.base_url(domain)
                );
            }
            println!("{:<14} -> users, posts_content, posts_category", "/search");
        }
    }

    Ok(())
}
