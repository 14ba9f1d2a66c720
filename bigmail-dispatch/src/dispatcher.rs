//! The feeder: turns recipients into messages and keeps the pool busy until
//! every message has been sent or has failed.

use std::{sync::Arc, time::Duration};

use bigmail_common::{Message, Template, internal, tracing};
use bigmail_smtp::Connector;
use bigmail_tracing::traced;
use tokio::sync::mpsc;

use crate::{
    error::DispatchError,
    pool::Pool,
    queue::{WorkQueue, work_queue},
    report::JobReport,
    sender::Failure,
    source::RecipientSource,
};

/// Pool sizing and pacing, applied to every sender of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub workers: usize,
    /// Pause after each successful send, per sender. Zero disables pacing.
    pub pacing: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            pacing: Duration::ZERO,
        }
    }
}

impl DispatchConfig {
    /// # Errors
    ///
    /// If the pool would be empty.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::Config(
                "at least one worker is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-job bookkeeping. `sent` is derived at the end, since a handed-over
/// message can still fail after the feeder has moved on.
#[derive(Default)]
struct Tally {
    report: JobReport,
    dispatched: usize,
    delivery_failures: usize,
}

impl Tally {
    fn failure(&mut self, failure: Failure) {
        tracing::warn!(
            worker = failure.worker,
            to = ?failure.message.to(),
            error = %failure.error,
            "Failed to send"
        );
        self.delivery_failures += 1;
        self.report.record_failure(failure.message.to().to_vec());
    }

    fn finish(mut self) -> JobReport {
        self.report.sent = self.dispatched - self.delivery_failures;
        self.report
    }
}

pub struct Dispatcher<C: Connector> {
    connector: Arc<C>,
    template: Template,
    config: DispatchConfig,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: C, template: Template, config: DispatchConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            template,
            config,
        }
    }

    /// Deliver one message per recipient in `source` and report the outcome.
    ///
    /// Each message is attempted at most once. A failed delivery terminates
    /// its sender, which is replaced while there is still work to hand out.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, the initial pool cannot be started, a
    /// replacement sender cannot be started, or `source` fails. Live senders
    /// are shut down before any of these is returned.
    #[traced(instrument(level = tracing::Level::INFO, skip_all, fields(workers = self.config.workers)), timing(precision = "ms"))]
    pub async fn run<S: RecipientSource>(&self, mut source: S) -> Result<JobReport, DispatchError> {
        self.config.validate()?;

        let (mut queue, work) = work_queue();
        let (failure_sink, mut failures) = mpsc::channel(1);
        let mut pool = Pool::new(
            Arc::clone(&self.connector),
            work,
            failure_sink,
            self.config.pacing,
        );
        let mut tally = Tally::default();

        for _ in 0..self.config.workers {
            if let Err(err) = pool.spawn().await {
                tracing::error!(%err, "Unable to start worker");
                queue.close();
                pool.wait_idle().await;
                return Err(DispatchError::Connect(err));
            }
        }

        internal!(
            level = INFO,
            "Spawned {} workers, begin sending messages",
            self.config.workers
        );

        let mut pending = match self.next_message(&mut source, &mut tally).await {
            Ok(message) => message,
            Err(err) => return Err(Self::abort(queue, &pool, &mut failures, &mut tally, err).await),
        };

        while let Some(message) = pending.take() {
            tokio::select! {
                Some(failure) = failures.recv() => {
                    tally.failure(failure);
                    pending = Some(message);

                    // No work is handed out while the replacement connects;
                    // the stall is bounded by the connect timeout.
                    match pool.spawn().await {
                        Ok(id) => {
                            tally.report.respawned += 1;
                            internal!(level = INFO, worker = id, "Replacement worker spawned");
                        }
                        Err(err) => {
                            tracing::error!(%err, "Unable to replace failed worker");
                            let err = DispatchError::Respawn(err);
                            return Err(Self::abort(queue, &pool, &mut failures, &mut tally, err).await);
                        }
                    }
                }
                Some(claim) = queue.ready() => {
                    match claim.deliver(message) {
                        Ok(()) => {
                            tally.dispatched += 1;
                            pending = match self.next_message(&mut source, &mut tally).await {
                                Ok(message) => message,
                                Err(err) => {
                                    return Err(Self::abort(queue, &pool, &mut failures, &mut tally, err).await);
                                }
                            };
                        }
                        Err(message) => pending = Some(message),
                    }
                }
                else => return Err(DispatchError::WorkersGone),
            }
        }

        internal!(
            level = INFO,
            "Recipient list exhausted after {} entries, waiting for {} workers",
            tally.report.read,
            pool.live()
        );
        Self::drain(queue, &pool, &mut failures, &mut tally).await;

        let report = tally.finish();
        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            respawned = report.respawned,
            "Message sending finished"
        );

        Ok(report)
    }

    /// Build the next message, skipping entries that cannot form one. Those
    /// are counted as failed without being handed to a sender.
    async fn next_message<S: RecipientSource>(
        &self,
        source: &mut S,
        tally: &mut Tally,
    ) -> Result<Option<Message>, DispatchError> {
        while let Some(recipient) = source.next_recipient().await? {
            tally.report.read += 1;

            match self.template.message_for(recipient.as_str()) {
                Ok(message) => return Ok(Some(message)),
                Err(err) => {
                    tracing::warn!(%err, "Skipping recipient entry");
                    tally.report.record_failure(vec![recipient]);
                }
            }
        }

        Ok(None)
    }

    /// Close the work queue and wait for every sender to finish, tallying
    /// failures as they arrive. Nothing is respawned at this point.
    async fn drain(
        mut queue: WorkQueue,
        pool: &Pool<C>,
        failures: &mut mpsc::Receiver<Failure>,
        tally: &mut Tally,
    ) {
        queue.close();

        loop {
            tokio::select! {
                () = pool.wait_idle() => break,
                Some(failure) = failures.recv() => tally.failure(failure),
            }
        }

        // A sender reports before it leaves the count; pick up any report
        // that raced with the final wakeup.
        while let Ok(failure) = failures.try_recv() {
            tally.failure(failure);
        }
    }

    async fn abort(
        queue: WorkQueue,
        pool: &Pool<C>,
        failures: &mut mpsc::Receiver<Failure>,
        tally: &mut Tally,
        err: DispatchError,
    ) -> DispatchError {
        tracing::error!(%err, "Job aborted, shutting down workers");
        Self::drain(queue, pool, failures, tally).await;
        err
    }
}
