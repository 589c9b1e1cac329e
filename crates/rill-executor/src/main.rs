//! Rill executor - runs tasks on behalf of a governor.

mod builtins;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use rill_core::ExecutorConfig;
use rill_core::config::DEFAULT_EXECUTOR_TYPE;

#[derive(Parser)]
#[command(name = "rill-executor")]
#[command(about = "Executor process that runs tasks for a Rill governor")]
#[command(version)]
struct Cli {
    /// Identifier assigned by the governor
    #[arg(long, env = "RILL_EXECUTOR_ID")]
    executor_id: u32,

    /// Path of the governor's Unix domain socket
    #[arg(long, env = "RILL_EXECUTOR_SOCKET")]
    socket: PathBuf,

    /// Root of the task working and staging directories
    #[arg(long, env = "RILL_EXECUTOR_WORKDIR")]
    work_dir: Option<PathBuf>,

    /// Executor type announced to the governor
    #[arg(long, default_value = DEFAULT_EXECUTOR_TYPE)]
    executor_type: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; the governor owns the socket.
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ExecutorConfig::new(cli.executor_id)
        .with_executor_type(cli.executor_type)
        .with_change_dir(true);
    if let Some(work_dir) = cli.work_dir {
        config = config.with_work_root(work_dir);
    }

    let registry = builtins::registry().context("Failed to register built-in functions")?;
    serve(&cli.socket, config, registry)
}

#[cfg(unix)]
fn serve(
    socket: &std::path::Path,
    config: ExecutorConfig,
    registry: rill_core::FunctionRegistry,
) -> anyhow::Result<()> {
    let executor_id = config.executor_id;
    let mut executor = rill_core::Executor::connect(socket, config, registry)
        .with_context(|| format!("Failed to start executor {}", executor_id))?;

    executor
        .run()
        .with_context(|| format!("Executor {} stopped", executor_id))
}

#[cfg(not(unix))]
fn serve(
    _socket: &std::path::Path,
    _config: ExecutorConfig,
    _registry: rill_core::FunctionRegistry,
) -> anyhow::Result<()> {
    anyhow::bail!("rill-executor needs Unix domain sockets")
}
