//! The delivery session seam.
//!
//! The dispatcher drives deliveries through [`Connector`] and [`Session`]
//! only. [`SmtpConnector`] is the production implementation backed by
//! [`SmtpClient`]; tests substitute in-memory sessions.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bigmail_common::{config::ClientTimeouts, tracing};
use bigmail_tracing::traced;

use crate::client::{ClientError, Response, Result, SmtpClient};

/// Establishes sessions against one relay.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    /// Open a session that is ready for its first transaction.
    async fn connect(&self) -> Result<Self::Session>;
}

/// One live, exclusively owned, connection to the relay.
///
/// A transaction is `declare_sender`, one `declare_recipient` per
/// recipient, `open_body`, any number of `write_body`, then `close_body`.
#[async_trait]
pub trait Session: Send + 'static {
    async fn declare_sender(&mut self, address: &str) -> Result<()>;

    async fn declare_recipient(&mut self, address: &str) -> Result<()>;

    async fn open_body(&mut self) -> Result<()>;

    async fn write_body(&mut self, bytes: &[u8]) -> Result<()>;

    /// Ends the body. Success means the relay has accepted the message.
    async fn close_body(&mut self) -> Result<()>;

    /// Best-effort polite close. Never fails.
    async fn quit(&mut self);
}

async fn bounded<T>(
    step: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ClientError::Timeout(step))?
}

/// Host part of `host:port`, used for TLS server name verification.
fn server_name(address: &str) -> &str {
    let host = address
        .rsplit_once(':')
        .map_or(address, |(host, _port)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Connects to a relay over SMTP, optionally upgrading with STARTTLS.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    address: String,
    helo: String,
    use_tls: bool,
    accept_invalid_certs: bool,
    timeouts: ClientTimeouts,
}

impl SmtpConnector {
    /// `address` is `host:port`.
    #[must_use]
    pub fn new(address: impl Into<String>, use_tls: bool) -> Self {
        Self {
            address: address.into(),
            helo: "localhost".to_string(),
            use_tls,
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }

    /// The name announced with EHLO.
    #[must_use]
    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = helo.into();
        self
    }

    /// Skip certificate verification after STARTTLS (testing only).
    #[must_use]
    pub const fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(server = %self.address, tls = self.use_tls)), timing(precision = "ms"))]
    async fn open(&self) -> Result<SmtpSession> {
        if self.accept_invalid_certs {
            tracing::warn!(
                server = %self.address,
                "TLS certificate validation is disabled for this connection"
            );
        }

        let client = bounded("connect", self.timeouts.connect(), self.handshake()).await?;

        Ok(SmtpSession {
            client,
            timeouts: self.timeouts.clone(),
        })
    }

    async fn handshake(&self) -> Result<SmtpClient> {
        let mut client = SmtpClient::connect(&self.address, server_name(&self.address))
            .await?
            .accept_invalid_certs(self.accept_invalid_certs);

        client.read_greeting().await?.expect(Response::is_success)?;

        let command = self.timeouts.command();
        let ehlo = bounded("EHLO", command, client.ehlo(&self.helo))
            .await?
            .expect(Response::is_success)?;

        if self.use_tls {
            if !ehlo.advertises("STARTTLS") {
                return Err(ClientError::Tls(format!(
                    "{} does not advertise STARTTLS",
                    self.address
                )));
            }

            bounded("STARTTLS", command, client.starttls())
                .await?
                .expect(Response::is_success)?;

            bounded("EHLO", command, client.ehlo(&self.helo))
                .await?
                .expect(Response::is_success)?;
        }

        Ok(client)
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    type Session = SmtpSession;

    async fn connect(&self) -> Result<SmtpSession> {
        self.open().await
    }
}

/// A [`Session`] over a real SMTP connection.
pub struct SmtpSession {
    client: SmtpClient,
    timeouts: ClientTimeouts,
}

impl SmtpSession {
    /// Whether STARTTLS was negotiated.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.client.is_tls()
    }
}

#[async_trait]
impl Session for SmtpSession {
    async fn declare_sender(&mut self, address: &str) -> Result<()> {
        bounded(
            "MAIL FROM",
            self.timeouts.command(),
            self.client.mail_from(address),
        )
        .await?
        .expect(Response::is_success)
        .map(drop)
    }

    async fn declare_recipient(&mut self, address: &str) -> Result<()> {
        bounded("RCPT TO", self.timeouts.command(), self.client.rcpt_to(address))
            .await?
            .expect(Response::is_success)
            .map(drop)
    }

    async fn open_body(&mut self) -> Result<()> {
        bounded("DATA", self.timeouts.data(), self.client.data())
            .await?
            .expect(Response::is_intermediate)
            .map(drop)
    }

    async fn write_body(&mut self, bytes: &[u8]) -> Result<()> {
        bounded("message body", self.timeouts.data(), self.client.write_data(bytes)).await
    }

    async fn close_body(&mut self) -> Result<()> {
        bounded("end of data", self.timeouts.data(), self.client.end_data())
            .await?
            .expect(Response::is_success)
            .map(drop)
    }

    async fn quit(&mut self) {
        match tokio::time::timeout(self.timeouts.quit(), self.client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::debug!(%err, "QUIT failed"),
            Err(_) => tracing::debug!("QUIT timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_strips_port() {
        assert_eq!(server_name("smtp.example.com:587"), "smtp.example.com");
        assert_eq!(server_name("[::1]:25"), "::1");
        assert_eq!(server_name("localhost"), "localhost");
    }
}
