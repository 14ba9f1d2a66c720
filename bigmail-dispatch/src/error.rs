use std::io;

use bigmail_smtp::ClientError;
use thiserror::Error;

/// Errors that end a job.
///
/// A single failed delivery is not one of these: it is tallied in the
/// [`JobReport`](crate::JobReport) and the worker is replaced.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// One of the initial workers could not establish its session.
    #[error("Unable to start worker: {0}")]
    Connect(#[source] ClientError),

    /// A replacement for a failed worker could not establish its session.
    #[error("Unable to replace failed worker: {0}")]
    Respawn(#[source] ClientError),

    #[error("Unable to read recipient list: {0}")]
    Source(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Every handle on the work queue went away while messages were still
    /// waiting to be handed out.
    #[error("All workers are gone with work still pending")]
    WorkersGone,
}
