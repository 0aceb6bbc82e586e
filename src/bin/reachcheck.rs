//! Reachcheck CLI
//!
//! Runs one classification and prints whether this host has a dedicated
//! public IP or sits behind NAT.

use anyhow::Context;
use clap::Parser;
use reachcheck::connectivity::{ClassificationEngine, Verdict};
use reachcheck::ProbeConfig;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "reachcheck", version, about = "Check whether this host has a dedicated public IP")]
struct Cli {
    /// Enable debug mode (verbose logs, raw response bodies)
    #[arg(long)]
    debug: bool,

    /// Port number to listen on and probe (0 or unset: default port)
    #[arg(long)]
    port: Option<u16>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the NAT-PMP mapping attempt
    #[arg(long)]
    no_natpmp: bool,

    /// STUN server as host:port
    #[arg(long)]
    stun_server: Option<String>,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<(ProbeConfig, bool)> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ProbeConfig::default(),
        };

        config.debug |= self.debug;
        match self.port {
            Some(0) => config.port = None,
            Some(port) => config.port = Some(port),
            None => {}
        }
        if self.no_natpmp {
            config.natpmp_enabled = false;
        }
        if let Some(server) = self.stun_server {
            config.stun_server = server;
        }

        config.validate()?;
        Ok((config, self.json))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let (config, json) = Cli::parse().into_config()?;
    reachcheck::init(config.debug);

    if config.debug {
        tracing::debug!("Debug mode enabled");
    }

    let engine = ClassificationEngine::from_config(config)?;
    let report = match engine.run().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let marker = match report.classification.verdict {
            Verdict::DedicatedPublicIP => "✓",
            Verdict::SharedOrNATedIP => "✗",
            Verdict::Indeterminate => "?",
        };
        println!("{} {}", marker, report.classification.summary());
    }

    Ok(ExitCode::SUCCESS)
}
