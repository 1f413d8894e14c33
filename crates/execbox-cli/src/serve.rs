//! Serve command implementation for execbox CLI.
//!
//! Starts the HTTP execution server.

use execbox_server::ServerConfig;

use crate::ExecutorArgs;
use crate::colors;

/// Port used when neither `--port` nor any port variable is set.
const DEFAULT_PORT: u16 = 3001;

/// Legacy port variable, consulted after `EXECBOX_PORT`.
const LEGACY_PORT_VAR: &str = "EXECUTION_SERVICE_PORT";

fn resolve_port(explicit: Option<u16>) -> anyhow::Result<u16> {
    if let Some(port) = explicit {
        return Ok(port);
    }
    match std::env::var(LEGACY_PORT_VAR) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} is not a valid port: {}", LEGACY_PORT_VAR, value)),
        Err(_) => Ok(DEFAULT_PORT),
    }
}

/// Start the execution server.
pub async fn execute(host: String, port: Option<u16>, executor: &ExecutorArgs) -> anyhow::Result<()> {
    let executor = executor.to_config();
    executor.validate()?;

    let config = ServerConfig {
        host,
        port: resolve_port(port)?,
        executor,
        ..ServerConfig::default()
    };

    println!("\n{}Execbox Server{} - Sandboxed Code Execution", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Server:{} http://{}:{}",
        colors::CYAN,
        colors::RESET,
        config.host,
        config.port
    );
    println!(
        "{}  ◆ Workspaces:{} {}",
        colors::CYAN,
        colors::RESET,
        config.executor.workspace_root.display()
    );
    println!(
        "{}  ◆ Limits:{} {} ms, {} MB",
        colors::CYAN,
        colors::RESET,
        config.executor.execution_timeout.as_millis(),
        config.executor.memory_limit_mb
    );
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    execbox_server::serve(config).await?;

    Ok(())
}
