use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use abd_core::batch::{self, BatchContext, Mode};
use abd_core::config;
use abd_core::link::HeadlessLink;
use abd_core::transport::{CurlTransport, Timeouts, Transport};

/// Top-level CLI for the abd adaptive batch downloader.
#[derive(Debug, Parser)]
#[command(name = "abd")]
#[command(about = "abd: adaptive batch downloader with weak-link migration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a numbered image batch and emit the run report as JSON.
    Run {
        /// Base URL the img_NNN.jpg objects live under.
        #[arg(long)]
        base_url: String,

        /// Number of objects in the batch.
        #[arg(long)]
        count: usize,

        /// WIFI_ONLY (never migrate) or AUTO_SWITCH (migrate on weak link).
        #[arg(long, default_value = "WIFI_ONLY")]
        mode: String,

        /// Destination directory (defaults to the current directory).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Write the JSON report to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Probe one URL with HEAD and print the parsed metadata.
    Head {
        /// Direct HTTP/HTTPS URL to probe.
        url: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        cli.command.execute().await
    }

    pub async fn execute(self) -> Result<()> {
        match self {
            CliCommand::Run {
                base_url,
                count,
                mode,
                dir,
                out,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let mode: Mode = mode.parse()?;
                let download_dir = match dir {
                    Some(d) => d,
                    None => std::env::current_dir()?,
                };
                let ctx = BatchContext::new(
                    Arc::new(CurlTransport::new()),
                    Arc::new(HeadlessLink::default()),
                    download_dir,
                );

                let report = batch::run_batch(&cfg, &base_url, count, mode, &ctx).await?;
                let json = serde_json::to_string_pretty(&report)?;
                match out {
                    Some(path) => {
                        std::fs::write(&path, json)?;
                        println!("Report written to {}", path.display());
                    }
                    None => println!("{json}"),
                }
            }
            CliCommand::Head { url } => {
                let head = CurlTransport::new().head(&url, Timeouts::head())?;
                println!("status:         {}", head.status);
                println!(
                    "content-length: {}",
                    head.content_length
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
                println!("accept-ranges:  {}", head.accept_ranges);
                println!("etag:           {}", head.etag.as_deref().unwrap_or("-"));
                println!(
                    "last-modified:  {}",
                    head.last_modified.as_deref().unwrap_or("-")
                );
            }
        }

        Ok(())
    }
}
