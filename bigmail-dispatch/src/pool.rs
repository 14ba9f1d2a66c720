//! The pool supervisor: spawns senders and keeps count of the live ones.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bigmail_common::{internal, tracing};
use bigmail_smtp::{ClientError, Connector};
use tokio::sync::{Notify, mpsc};

use crate::{
    queue::WorkSource,
    sender::{Failure, Sender},
};

/// Number of senders whose work loop has not returned, with a wakeup when
/// it reaches zero.
#[derive(Debug, Default)]
pub struct LiveCounter {
    live: AtomicUsize,
    idle: Notify,
}

impl LiveCounter {
    fn enter(self: &Arc<Self>) -> LiveGuard {
        self.live.fetch_add(1, Ordering::AcqRel);
        LiveGuard(Arc::clone(self))
    }

    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Resolve once no sender is live.
    ///
    /// Cancel safe; the interest is registered before the count is read, so
    /// a decrement racing with this call is never missed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.live() == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// Held by a sender task; decrements the count exactly once when dropped.
#[derive(Debug)]
pub struct LiveGuard(Arc<LiveCounter>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if self.0.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Spawns senders attached to one work queue and one failure queue.
pub struct Pool<C: Connector> {
    connector: Arc<C>,
    work: WorkSource,
    failures: mpsc::Sender<Failure>,
    pacing: Duration,
    counter: Arc<LiveCounter>,
    next_id: usize,
}

impl<C: Connector> Pool<C> {
    pub fn new(
        connector: Arc<C>,
        work: WorkSource,
        failures: mpsc::Sender<Failure>,
        pacing: Duration,
    ) -> Self {
        Self {
            connector,
            work,
            failures,
            pacing,
            counter: Arc::default(),
            next_id: 0,
        }
    }

    /// Establish a session and start a sender on it. The sender counts as
    /// live from the moment this returns `Ok`.
    ///
    /// # Errors
    ///
    /// If the session could not be established; nothing is spawned then.
    pub async fn spawn(&mut self) -> Result<usize, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        let session = self.connector.connect().await?;
        let guard = self.counter.enter();

        let sender = Sender::new(
            id,
            session,
            self.pacing,
            self.work.clone(),
            self.failures.clone(),
        );

        tokio::spawn(async move {
            let exit = sender.run().await;
            tracing::debug!(worker = id, ?exit, "Worker finished");
            drop(guard);
        });

        internal!(level = DEBUG, worker = id, "Worker spawned");

        Ok(id)
    }

    #[must_use]
    pub fn live(&self) -> usize {
        self.counter.live()
    }

    /// See [`LiveCounter::wait_idle`].
    pub async fn wait_idle(&self) {
        self.counter.wait_idle().await;
    }
}
