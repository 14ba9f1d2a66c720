//! The message handed from the feeder to a sender, and the template it is
//! built from.

use std::{fmt::Write, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("A message needs at least one recipient")]
    NoRecipients,

    #[error("A message needs a sender address")]
    MissingSender,

    #[error("Address contains a line break: {0:?}")]
    InvalidAddress(String),
}

fn check_address(address: &str) -> Result<(), MessageError> {
    if address.contains(['\r', '\n']) {
        return Err(MessageError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// A single outbound message.
///
/// Immutable once built: whoever holds it (the feeder, the work queue, a
/// sender, or the failure queue) can only read it. The body is shared
/// between every message produced from the same [`Template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: Arc<str>,
    to: Vec<String>,
    subject: Option<Arc<str>>,
    body: Arc<str>,
}

impl Message {
    /// Build a message.
    ///
    /// # Errors
    ///
    /// If `to` is empty, `from` is empty, or an address would break header
    /// framing.
    pub fn new(
        from: impl Into<Arc<str>>,
        to: Vec<String>,
        subject: Option<Arc<str>>,
        body: impl Into<Arc<str>>,
    ) -> Result<Self, MessageError> {
        let from = from.into();
        if from.trim().is_empty() {
            return Err(MessageError::MissingSender);
        }
        if to.is_empty() {
            return Err(MessageError::NoRecipients);
        }

        check_address(&from)?;
        to.iter().try_for_each(|address| check_address(address))?;

        Ok(Self {
            from,
            to,
            subject,
            body: body.into(),
        })
    }

    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Recipients, in the order they are declared to the relay.
    #[must_use]
    pub fn to(&self) -> &[String] {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Headers, a blank line, then the body, stamped with the current time.
    #[must_use]
    pub fn render(&self) -> String {
        self.render_at(Utc::now())
    }

    /// As [`Message::render`], with an explicit `Date` header.
    #[must_use]
    pub fn render_at(&self, date: DateTime<Utc>) -> String {
        let mut message = String::with_capacity(self.body.len() + 256);

        // Writing into a String cannot fail.
        let _ = write!(message, "From: {}\r\n", self.from);
        let _ = write!(message, "To: {}\r\n", self.to.join(", "));
        if let Some(subject) = &self.subject {
            let _ = write!(message, "Subject: {subject}\r\n");
        }
        let _ = write!(message, "Date: {}\r\n", date.to_rfc2822());
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("\r\n");
        message.push_str(&self.body);

        message
    }
}

/// Sender address, subject and body shared by every message of a job.
#[derive(Debug, Clone)]
pub struct Template {
    from: Arc<str>,
    subject: Option<Arc<str>>,
    body: Arc<str>,
}

impl Template {
    /// # Errors
    ///
    /// If `from` is empty or not a single header line.
    pub fn new(
        from: impl Into<Arc<str>>,
        subject: Option<String>,
        body: impl Into<Arc<str>>,
    ) -> Result<Self, MessageError> {
        let from = from.into();
        if from.trim().is_empty() {
            return Err(MessageError::MissingSender);
        }
        check_address(&from)?;

        Ok(Self {
            from,
            subject: subject.map(Arc::from),
            body: body.into(),
        })
    }

    /// One message for one recipient entry.
    ///
    /// # Errors
    ///
    /// If `recipient` would break header framing.
    pub fn message_for(&self, recipient: impl Into<String>) -> Result<Message, MessageError> {
        Message::new(
            Arc::clone(&self.from),
            vec![recipient.into()],
            self.subject.clone(),
            Arc::clone(&self.body),
        )
    }
}
