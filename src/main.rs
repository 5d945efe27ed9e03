use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cloud_e2e::config::{self, E2eConfig};

#[derive(Parser)]
#[command(
    name = "cloud-e2e",
    about = "End-to-end harness and result dashboard for cloud API tests",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $E2E_CONFIG, then ./e2e.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the result dashboard and accept result submissions
    Serve {
        /// Bind address, overrides `server.bind`
        #[arg(long, env = "ADDR")]
        bind: Option<String>,
    },

    /// Print the resolved configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = cloud_e2e::logging::bootstrap(|| E2eConfig::resolve(cli.config.as_deref()))?;

    cloud_e2e::logging::init(&cfg.logging)?;
    tracing::debug!(source = %config::describe_source(cli.config.as_deref()).display(), "configuration resolved");

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            tracing::info!(bind = %cfg.server.bind, "starting result dashboard");
            cloud_e2e::serve(cfg).await?;
        }
        Commands::CheckConfig => {
            println!("# source: {}", config::describe_source(cli.config.as_deref()).display());
            print!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
