use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tollbot::{gateway, Config};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "tollbot",
    about = "Payment-gated chat bot: defer a command, collect an x402 payment, deliver one reply",
    version
)]
struct Cli {
    /// Path to config.toml (default: ~/.tollbot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook gateway
    Serve {
        /// Bind host override
        #[arg(long)]
        host: Option<String>,
        /// Bind port override
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the resolved configuration (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load(cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if config.payment.pay_to.is_empty() {
                tracing::warn!(
                    "payment.pay_to is not configured; challenges will carry an empty receiving address"
                );
            }
            gateway::run_gateway(config).await
        }
        Commands::Config => {
            let mut redacted = config;
            if !redacted.telegram.bot_token.is_empty() {
                redacted.telegram.bot_token = "<redacted>".into();
            }
            if !redacted.telegram.webhook_secret.is_empty() {
                redacted.telegram.webhook_secret = "<redacted>".into();
            }
            println!("{}", toml::to_string_pretty(&redacted)?);
            Ok(())
        }
    }
}
