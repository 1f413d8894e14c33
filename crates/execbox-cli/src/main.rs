//! Execbox CLI - sandboxed code execution service.

mod colors;
mod languages;
mod run;
mod serve;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use execbox_core::ExecutorConfig;

#[derive(Parser)]
#[command(name = "execbox")]
#[command(about = "Sandboxed code execution service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Execution limits shared by `serve` and `run`.
#[derive(Args, Debug, Clone)]
pub struct ExecutorArgs {
    /// Wall-clock limit per compile and per run, in milliseconds
    #[arg(long, env = "MAX_EXECUTION_TIME", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Memory ceiling in MB (0 disables it)
    #[arg(long, env = "MAX_MEMORY_LIMIT", default_value_t = 512)]
    memory_mb: u64,

    /// Directory for per-execution workspaces [default: <tmp>/execbox]
    #[arg(long, env = "EXECBOX_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,
}

impl ExecutorArgs {
    pub fn to_config(&self) -> ExecutorConfig {
        let defaults = ExecutorConfig::default();
        ExecutorConfig {
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or(defaults.workspace_root.clone()),
            execution_timeout: Duration::from_millis(self.timeout_ms),
            memory_limit_mb: self.memory_mb,
            ..defaults
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP execution server
    Serve {
        /// Host address to bind to
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on [default: 3001, or EXECUTION_SERVICE_PORT]
        #[arg(short, long, env = "EXECBOX_PORT")]
        port: Option<u16>,

        #[command(flatten)]
        executor: ExecutorArgs,
    },

    /// Run a single source file as a batch execution
    Run {
        /// Path to the source file
        file: PathBuf,

        /// Language identifier (inferred from the file extension by default)
        #[arg(short, long)]
        language: Option<String>,

        /// File whose contents are fed to the program's stdin
        #[arg(long)]
        stdin: Option<PathBuf>,

        #[command(flatten)]
        executor: ExecutorArgs,
    },

    /// List supported languages and toolchain availability
    Languages {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging. The server logs lifecycle events at INFO; one-shot
    // commands keep stderr for the program's own output.
    let default_level = match cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            executor,
        } => serve::execute(host, port, &executor).await?,

        Commands::Run {
            file,
            language,
            stdin,
            executor,
        } => {
            let code = run::execute(&file, language.as_deref(), stdin.as_deref(), &executor).await?;
            std::process::exit(code);
        }

        Commands::Languages { json } => languages::execute(json)?,
    }

    Ok(())
}
