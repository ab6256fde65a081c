use clap::{Args, Parser, Subcommand};
use code_exec::{HeuristicDetector, IsolationMode, LanguageDetector, ToolchainRegistry};
use code_runner::{
    exit_code, read_source, render_json, render_languages, render_text, run_source, RunOptions,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect and run a source file (stdin when omitted)
    Run {
        file: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        settings: Settings,
    },
    /// Print the language a source file is detected as
    Detect { file: Option<PathBuf> },
    /// List supported languages and whether their tools are installed
    Languages,
}

#[derive(Args, Debug)]
struct Settings {
    /// TOML file with execution settings
    #[arg(short, long, env = "CODE_EXEC_CONFIG")]
    config: Option<PathBuf>,

    /// Wall-clock limit in seconds, capped by the configured one
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Isolation backend: auto, bubblewrap, namespaces or none
    #[arg(long)]
    isolation: Option<IsolationMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Command::Run {
            file,
            json,
            settings,
        } => {
            let source = read_source(file.as_deref())?;
            let options = RunOptions {
                config: settings.config,
                timeout: settings.timeout,
                isolation: settings.isolation,
            };
            let result = run_source(source, &options).await?;

            if json {
                println!("{}", render_json(&result)?);
            } else {
                print!("{}", render_text(&result));
            }
            std::process::exit(exit_code(&result));
        }
        Command::Detect { file } => {
            let source = read_source(file.as_deref())?;
            println!("{}", HeuristicDetector::new().detect(&source));
        }
        Command::Languages => {
            print!("{}", render_languages(&ToolchainRegistry::standard()));
        }
    }

    Ok(())
}
