//! Bulk mail delivery: one message per recipient, through a pool of SMTP
//! connections to a single relay.

pub mod config;

use anyhow::Context;
use bigmail_common::{Template, internal};
use bigmail_dispatch::{DispatchConfig, Dispatcher, JobReport, LineSource};
use bigmail_smtp::SmtpConnector;

pub use config::{ConfigError, JobConfig, Overrides};

/// Run the job described by `config` to completion.
///
/// # Errors
///
/// If the configuration is invalid, an input file cannot be read, or the
/// job aborts. Individual delivery failures are reported in the returned
/// [`JobReport`], not as errors.
pub async fn run(config: &JobConfig) -> anyhow::Result<JobReport> {
    config.validate()?;

    let body = tokio::fs::read_to_string(&config.content)
        .await
        .with_context(|| format!("Could not read content file {}", config.content.display()))?;
    let source = LineSource::open(&config.list)
        .await
        .with_context(|| format!("Could not read list file {}", config.list.display()))?;
    let template = Template::new(config.from.as_str(), config.subject.clone(), body)?;

    let connector = SmtpConnector::new(config.server.as_str(), config.use_tls)
        .with_helo(config.helo.as_str())
        .with_accept_invalid_certs(config.accept_invalid_certs)
        .with_timeouts(config.timeouts.clone());

    internal!(
        level = INFO,
        "Sending to {} with {} workers (tls: {}, pacing: {:?})",
        config.server,
        config.workers,
        config.use_tls,
        config.pacing()
    );

    let dispatcher = Dispatcher::new(
        connector,
        template,
        DispatchConfig {
            workers: config.workers,
            pacing: config.pacing(),
        },
    );

    Ok(dispatcher.run(source).await?)
}
