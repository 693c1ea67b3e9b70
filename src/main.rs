//! proxyprobe - main entry point.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use proxyprobe::{AdvancedChecks, Engine, EngineConfig, TracingLogger};

#[derive(Parser, Debug)]
#[command(name = "proxyprobe", about = "Validate and audit forward proxies")]
struct Cli {
    /// File of candidate proxy URLs, one per line; '-' reads stdin.
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Overall per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Validation URL overriding the configured one.
    #[arg(long)]
    validation_url: Option<String>,

    /// Enable every vulnerability probe family.
    #[arg(long)]
    all_checks: bool,

    /// Attach a phase-by-phase trace to each result.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let mut config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(secs) = cli.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(url) = cli.validation_url {
        config.validation_url = url;
    }
    if cli.all_checks {
        config.advanced = AdvancedChecks::all_enabled();
        config.enable_fingerprint = true;
        config.enable_cloud_checks = true;
    }

    let input = read_input(&cli.input)?;
    let proxies: Vec<&str> = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    if proxies.is_empty() {
        anyhow::bail!("no proxy URLs in input");
    }

    let engine = Engine::new(config, cli.debug, Arc::new(TracingLogger))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    for proxy in proxies {
        let result = engine.check(proxy).await;
        println!("{}", serde_json::to_string(&result)?);
    }

    engine.close();
    Ok(())
}

fn read_input(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}
