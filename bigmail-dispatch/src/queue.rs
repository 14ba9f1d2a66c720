//! The work queue between the feeder and its senders.
//!
//! Handing over a message is a rendezvous: a sender that is ready for work
//! posts a one-shot ticket on the demand channel and waits on it, and the
//! feeder completes a ticket with the next message. A message therefore
//! only leaves the feeder once a sender is waiting for it, and a sender that
//! is pacing itself simply does not ask.

use bigmail_common::Message;
use tokio::sync::{mpsc, oneshot};

type Ticket = oneshot::Sender<Message>;

/// Create a connected pair of queue ends.
#[must_use]
pub fn work_queue() -> (WorkQueue, WorkSource) {
    let (demand, tickets) = mpsc::unbounded_channel();
    (WorkQueue { tickets }, WorkSource { demand })
}

/// The feeder's end.
#[derive(Debug)]
pub struct WorkQueue {
    tickets: mpsc::UnboundedReceiver<Ticket>,
}

impl WorkQueue {
    /// Wait for a sender to become ready.
    ///
    /// Cancel safe: nothing is taken from the feeder until
    /// [`Claim::deliver`] is called, so this can sit in a `select!` beside
    /// other work.
    ///
    /// Returns `None` only once every [`WorkSource`] has been dropped.
    pub async fn ready(&mut self) -> Option<Claim> {
        self.tickets.recv().await.map(Claim)
    }

    /// Close the queue. Every sender waiting now, and every sender that
    /// asks later, sees the closure and shuts down.
    pub fn close(&mut self) {
        self.tickets.close();
        while self.tickets.try_recv().is_ok() {}
    }
}

/// A ready sender's request for one message.
#[derive(Debug)]
pub struct Claim(Ticket);

impl Claim {
    /// Hand `message` to the sender.
    ///
    /// # Errors
    ///
    /// Gives the message back if the sender stopped waiting, so it can be
    /// offered again.
    pub fn deliver(self, message: Message) -> Result<(), Message> {
        self.0.send(message)
    }
}

/// A sender's end. Cloned into every sender attached to the queue.
#[derive(Debug, Clone)]
pub struct WorkSource {
    demand: mpsc::UnboundedSender<Ticket>,
}

impl WorkSource {
    /// Wait for the next message. `None` means the queue is closed.
    pub async fn next(&self) -> Option<Message> {
        let (ticket, message) = oneshot::channel();
        self.demand.send(ticket).ok()?;
        message.await.ok()
    }
}
