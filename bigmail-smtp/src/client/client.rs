//! The connection to the relay: plain TCP, optionally upgraded in place
//! with STARTTLS.

use std::sync::Arc;

use bigmail_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        ClientConfig, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    data::DataEncoder,
    error::{ClientError, Result},
    response::Response,
};

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 4096;

/// Replies larger than this are treated as a protocol violation.
const MAX_REPLY_SIZE: usize = 1024 * 1024;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    fn stream(&mut self) -> &mut dyn Stream {
        match self {
            Self::Plain(stream) => stream,
            Self::Tls(stream) => &mut **stream,
        }
    }
}

/// Root store from the platform's native certificates. Certificates that
/// fail to load are skipped with a warning.
fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let loaded = rustls_native_certs::load_native_certs();
    if !loaded.errors.is_empty() {
        tracing::warn!(errors = ?loaded.errors, "Some native certificates could not be loaded");
    }

    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    tracing::trace!(added, ignored, "Loaded native root certificates");

    roots
}

fn tls_config(accept_invalid_certs: bool) -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .with_root_certificates(native_roots())
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate));
    }

    Arc::new(config)
}

/// Verifier that trusts whatever the relay presents. Test relays only.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// A single SMTP connection to a relay.
///
/// The client frames commands and parses replies. Deciding which replies
/// are acceptable is left to the caller.
pub struct SmtpClient {
    transport: Option<Transport>,
    pending: Vec<u8>,
    server_domain: String,
    accept_invalid_certs: bool,
    encoder: Option<DataEncoder>,
}

impl SmtpClient {
    /// Opens a TCP connection to `addr`. The greeting is not read.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            transport: Some(Transport::Plain(stream)),
            pending: Vec::with_capacity(READ_CHUNK),
            server_domain: server_domain.into(),
            accept_invalid_certs: false,
            encoder: None,
        })
    }

    /// Skip certificate verification once STARTTLS is negotiated.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.transport, Some(Transport::Tls(_)))
    }

    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Writes one command line without waiting for the reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is gone or the write fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        outgoing!("{command}");
        self.write(format!("{command}\r\n").as_bytes()).await
    }

    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// Sends DATA. After an intermediate (`354`) reply, content can be
    /// written with [`SmtpClient::write_data`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        let response = self.command("DATA").await?;
        if response.is_intermediate() {
            self.encoder = Some(DataEncoder::default());
        }
        Ok(response)
    }

    /// Writes a chunk of message content. Line endings become CRLF and a
    /// leading dot is doubled, also across chunk boundaries.
    ///
    /// # Errors
    ///
    /// Returns an error if no DATA transfer is open or the write fails.
    pub async fn write_data(&mut self, chunk: &[u8]) -> Result<()> {
        let encoded = self.open_transfer()?.encode(chunk);
        self.write(&encoded).await
    }

    /// Ends the content and reads the reply that accepts or rejects the
    /// message.
    ///
    /// # Errors
    ///
    /// Returns an error if no DATA transfer is open, or the write or read
    /// fails.
    pub async fn end_data(&mut self) -> Result<Response> {
        self.open_transfer()?;
        let trailer = self.encoder.take().map(DataEncoder::finish).unwrap_or_default();

        outgoing!(".");
        self.write(&trailer).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// Sends QUIT, then closes the socket whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        let response = self.command("QUIT").await;

        if let Some(mut transport) = self.transport.take()
            && let Err(err) = transport.stream().shutdown().await
        {
            tracing::debug!(%err, "Error while closing connection");
        }

        response
    }

    /// Sends STARTTLS and, on a positive reply, performs the handshake on
    /// the same socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails, the session is already
    /// encrypted, or the handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        if self.is_tls() {
            return Err(ClientError::Tls(
                "Connection is already TLS".to_string(),
            ));
        }

        let response = self.command("STARTTLS").await?;
        if !response.is_success() {
            return Ok(response);
        }

        let Some(Transport::Plain(stream)) = self.transport.take() else {
            return Err(ClientError::ConnectionClosed);
        };

        // Anything read before the handshake belongs to the plaintext session.
        self.pending.clear();

        let server_name = ServerName::try_from(self.server_domain.clone())
            .map_err(|e| ClientError::Tls(format!("Invalid domain: {e}")))?;
        let stream = TlsConnector::from(tls_config(self.accept_invalid_certs))
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        self.transport = Some(Transport::Tls(Box::new(stream)));
        Ok(response)
    }

    fn open_transfer(&mut self) -> Result<&mut DataEncoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| ClientError::Malformed("DATA transfer is not open".to_string()))
    }

    fn stream(&mut self) -> Result<&mut dyn Stream> {
        self.transport
            .as_mut()
            .map(Transport::stream)
            .ok_or(ClientError::ConnectionClosed)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads until one complete reply is buffered. Bytes past the reply are
    /// kept for the next call.
    async fn read_response(&mut self) -> Result<Response> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some((response, consumed)) = Response::parse(&self.pending)? {
                self.pending.drain(..consumed);
                incoming!("{response}");
                return Ok(response);
            }

            if self.pending.len() > MAX_REPLY_SIZE {
                return Err(ClientError::Malformed(format!(
                    "Response too large (exceeds {MAX_REPLY_SIZE} bytes)"
                )));
            }

            let read = self.stream()?.read(&mut chunk).await?;
            if read == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }
}
