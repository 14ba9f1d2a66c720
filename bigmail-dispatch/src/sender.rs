//! A sender: one SMTP session working through the shared work queue.

use std::{fmt, time::Duration};

use bigmail_common::{Message, internal, tracing};
use bigmail_smtp::{ClientError, Session};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::queue::WorkSource;

/// The delivery step that failed, and why.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("MAIL FROM failed: {0}")]
    DeclareSender(#[source] ClientError),

    #[error("RCPT TO <{recipient}> failed: {source}")]
    DeclareRecipient {
        recipient: String,
        #[source]
        source: ClientError,
    },

    #[error("DATA failed: {0}")]
    OpenBody(#[source] ClientError),

    #[error("Writing message content failed: {0}")]
    WriteBody(#[source] ClientError),

    #[error("Message was not accepted: {0}")]
    CloseBody(#[source] ClientError),
}

impl StepError {
    #[must_use]
    pub const fn client_error(&self) -> &ClientError {
        match self {
            Self::DeclareSender(err)
            | Self::DeclareRecipient { source: err, .. }
            | Self::OpenBody(err)
            | Self::WriteBody(err)
            | Self::CloseBody(err) => err,
        }
    }
}

/// A message a sender could not deliver. The sender that produced it has
/// terminated.
#[derive(Debug)]
pub struct Failure {
    pub worker: usize,
    pub message: Message,
    pub error: StepError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Waiting for a message.
    Ready,
    /// A message is in flight.
    Sending,
    /// Not accepting work until the pacing interval has elapsed.
    Paced,
    Terminated,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Sending => "sending",
            Self::Paced => "paced",
            Self::Terminated => "terminated",
        })
    }
}

/// How a sender's work loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The work queue was closed while the sender was ready.
    Clean,
    /// A delivery failed and was reported.
    Failed,
}

/// Run the delivery sequence for one message. The first failing step
/// aborts it.
pub(crate) async fn deliver<S: Session>(session: &mut S, message: &Message) -> Result<(), StepError> {
    session
        .declare_sender(message.from())
        .await
        .map_err(StepError::DeclareSender)?;

    for recipient in message.to() {
        session
            .declare_recipient(recipient)
            .await
            .map_err(|source| StepError::DeclareRecipient {
                recipient: recipient.clone(),
                source,
            })?;
    }

    session.open_body().await.map_err(StepError::OpenBody)?;
    session
        .write_body(message.render().as_bytes())
        .await
        .map_err(StepError::WriteBody)?;
    session.close_body().await.map_err(StepError::CloseBody)
}

/// One worker of the pool. Owns its session for its whole life.
pub struct Sender<S: Session> {
    id: usize,
    session: S,
    pacing: Duration,
    work: WorkSource,
    failures: mpsc::Sender<Failure>,
    state: SenderState,
}

impl<S: Session> Sender<S> {
    pub(crate) const fn new(
        id: usize,
        session: S,
        pacing: Duration,
        work: WorkSource,
        failures: mpsc::Sender<Failure>,
    ) -> Self {
        Self {
            id,
            session,
            pacing,
            work,
            failures,
            state: SenderState::Ready,
        }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    fn transition(&mut self, state: SenderState) {
        internal!(worker = self.id, "{} -> {}", self.state, state);
        self.state = state;
    }

    /// The work loop. Consumes the sender, and with it the session.
    ///
    /// A failed message is on the failure queue before this returns.
    pub async fn run(mut self) -> Exit {
        loop {
            let Some(message) = self.work.next().await else {
                self.transition(SenderState::Terminated);
                internal!(
                    level = DEBUG,
                    worker = self.id,
                    "Work queue closed, closing session"
                );
                self.session.quit().await;
                return Exit::Clean;
            };

            self.transition(SenderState::Sending);

            let outcome = deliver(&mut self.session, &message).await;
            match outcome {
                Ok(()) => {
                    tracing::debug!(worker = self.id, to = ?message.to(), "Message delivered");

                    if self.pacing.is_zero() {
                        self.transition(SenderState::Ready);
                    } else {
                        self.transition(SenderState::Paced);
                        tokio::time::sleep(self.pacing).await;
                        self.transition(SenderState::Ready);
                    }
                }
                Err(error) => {
                    self.transition(SenderState::Terminated);
                    tracing::warn!(worker = self.id, to = ?message.to(), %error, "Delivery failed");

                    let failure = Failure {
                        worker: self.id,
                        message,
                        error,
                    };
                    if let Err(mpsc::error::SendError(failure)) = self.failures.send(failure).await {
                        tracing::error!(
                            worker = self.id,
                            to = ?failure.message.to(),
                            "Failure queue is closed, failure was not reported"
                        );
                    }

                    self.session.quit().await;
                    return Exit::Failed;
                }
            }
        }
    }
}
