use clap::Parser;
use code_exec::{ExecutionConfig, IsolationMode};
use code_exec_server::{create_app, run_server};
use std::{net::SocketAddr, path::PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, env = "CODE_EXEC_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// TOML file with execution settings (replaces CODE_EXEC_* lookups)
    #[arg(short, long, env = "CODE_EXEC_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum number of concurrent executions
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Wall-clock limit per run in seconds
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Memory limit per run in MiB
    #[arg(long)]
    memory_limit_mb: Option<u64>,

    /// Captured bytes per output stream
    #[arg(long)]
    max_output_bytes: Option<usize>,

    /// Isolation backend: auto, bubblewrap, namespaces or none
    #[arg(long)]
    isolation: Option<IsolationMode>,
}

impl Args {
    fn execution_config(&self) -> anyhow::Result<ExecutionConfig> {
        let mut config = match &self.config {
            Some(path) => ExecutionConfig::from_file(path)?,
            None => ExecutionConfig::from_env()?,
        };

        if let Some(v) = self.max_concurrent {
            config.max_concurrent_executions = v;
        }
        if let Some(v) = self.timeout_seconds {
            config.timeout_seconds = v;
        }
        if let Some(v) = self.memory_limit_mb {
            config.memory_limit_mb = v;
        }
        if let Some(v) = self.max_output_bytes {
            config.max_output_bytes = v;
        }
        if let Some(v) = self.isolation {
            config.isolation = v;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.execution_config()?;

    let app = create_app(config).await?;
    run_server(app, args.addr).await?;

    Ok(())
}
