//! Entry point for the Neti overlay agent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use neti_agent::{LogOnlyTagger, Supervisor};
use neti_coordination::ZkConnector;
use neti_core::Config;
use neti_rules::IptablesRestore;

#[derive(Debug, Parser)]
#[command(name = "neti", about = "Overlay address agent spanning the EC2 and VPC realms")]
struct Cli {
    /// Alternate configuration file
    #[arg(short = 'c', value_name = "PATH")]
    config_file: Option<PathBuf>,

    /// Print the first synthesized rule program and exit without touching
    /// live rules
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config_file.as_deref()).context("loading configuration")?;
    let _log_guard = init_logging(&config.neti.log_file).context("opening log file")?;

    let installer = Arc::new(
        IptablesRestore::detect()
            .await
            .context("locating the packet filter loader")?,
    );

    let supervisor = Supervisor::new(
        config,
        Arc::new(ZkConnector),
        Arc::new(LogOnlyTagger),
        installer,
    )
    .with_dry_run(cli.dry_run);

    supervisor.run().await?;
    Ok(())
}

fn init_logging(log_file: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let dir = log_file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "neti.log".into());

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}
