#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use std::{path::PathBuf, process::ExitCode, time::Duration};

use bigmail::{JobConfig, Overrides, config::parse_duration};
use clap::{ArgAction, Parser};

/// Send one message to every address on a list
#[derive(Parser, Debug)]
#[command(name = "bigmail")]
#[command(version, about, long_about = None)]
struct Cli {
    /// RON file with job settings; flags override it
    #[arg(long, env = "BIGMAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Number of workers to spawn
    #[arg(long)]
    workers: Option<usize>,

    /// Address of the SMTP server, including the port, e.g. smtp.example.com:587
    #[arg(long)]
    server: Option<String>,

    /// Path to the file containing the email content
    #[arg(long)]
    content: Option<PathBuf>,

    /// Path to the file containing the recipient addresses
    #[arg(long)]
    list: Option<PathBuf>,

    /// From address of the email
    #[arg(long)]
    from: Option<String>,

    /// Subject line of the email
    #[arg(long)]
    subject: Option<String>,

    /// Use STARTTLS when connecting to the SMTP server
    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    usetls: Option<bool>,

    /// Time to wait between two sends on the same connection, e.g. 500ms or 2s
    #[arg(long, value_parser = parse_duration)]
    sleep: Option<Duration>,

    /// Name to announce in EHLO
    #[arg(long)]
    helo: Option<String>,

    /// Do not verify the relay's certificate (testing only)
    #[arg(long)]
    accept_invalid_certs: bool,
}

impl Cli {
    fn job_config(self) -> anyhow::Result<JobConfig> {
        let base = self
            .config
            .as_deref()
            .map(JobConfig::load)
            .transpose()?
            .unwrap_or_default();

        Ok(base.with_overrides(Overrides {
            server: self.server,
            workers: self.workers,
            use_tls: self.usetls,
            pacing: self.sleep,
            from: self.from,
            subject: self.subject,
            content: self.content,
            list: self.list,
            helo: self.helo,
            accept_invalid_certs: self.accept_invalid_certs,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    bigmail_common::logging::init();

    let config = Cli::parse().job_config()?;

    tokio::select! {
        report = bigmail::run(&config) => {
            let report = report?;
            println!("Message sending finished. {report}");
            for recipients in &report.failures {
                println!("  failed: {}", recipients.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, abandoning the job");
            Ok(ExitCode::from(130))
        }
    }
}
