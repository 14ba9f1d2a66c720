//! A scripted relay on a loopback socket.
//!
//! Every connection is answered from the same [`Script`]. Individual
//! recipients can be refused and the reply to the end of content can be
//! replaced, which is enough to drive senders into their failure path.
#![allow(dead_code)]

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
    task::JoinHandle,
};

/// What the relay saw, in arrival order across all connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Content up to the terminating dot, with dot-stuffing left in.
    MessageContent(String),
    Quit,
    StartTls,
    Other(String),
}

type Log = Arc<Mutex<Vec<SmtpCommand>>>;

const IDLE_LIMIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct Script {
    extensions: Vec<String>,
    refused: HashSet<String>,
    end_of_data: (u16, String),
}

impl Default for Script {
    fn default() -> Self {
        Self {
            extensions: vec!["SIZE 10000".to_string()],
            refused: HashSet::new(),
            end_of_data: (250, "queued".to_string()),
        }
    }
}

fn reply(code: u16, text: &str) -> String {
    format!("{code} {text}\r\n")
}

/// `FROM:<a@b>` or `TO:<a@b>` to `a@b`.
fn mailbox(argument: &str) -> String {
    let path = argument.split_once(':').map_or(argument, |(_, path)| path);
    path.trim().trim_matches(['<', '>']).to_string()
}

impl Script {
    fn ehlo(&self, client: &str) -> String {
        let mut lines = vec![format!("mock.relay greets {client}")];
        lines.extend(self.extensions.iter().cloned());

        let last = lines.len() - 1;
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("250{}{line}\r\n", if i == last { ' ' } else { '-' }))
            .collect()
    }

    /// The reply to one command line, and what to log for it.
    fn answer(&self, line: &str) -> (String, SmtpCommand) {
        let (verb, argument) = line.split_once(' ').unwrap_or((line, ""));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" => (self.ehlo(argument), SmtpCommand::Ehlo(argument.to_string())),
            "MAIL" => (reply(250, "sender ok"), SmtpCommand::MailFrom(mailbox(argument))),
            "RCPT" => {
                let recipient = mailbox(argument);
                let answer = if self.refused.contains(&recipient) {
                    reply(550, "no such mailbox")
                } else {
                    reply(250, "recipient ok")
                };
                (answer, SmtpCommand::RcptTo(recipient))
            }
            "DATA" => (reply(354, "end with <CRLF>.<CRLF>"), SmtpCommand::Data),
            "STARTTLS" => (reply(502, "not available"), SmtpCommand::StartTls),
            "QUIT" => (reply(221, "bye"), SmtpCommand::Quit),
            _ => (reply(500, "unrecognised"), SmtpCommand::Other(line.to_string())),
        }
    }
}

async fn read_content<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut content = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line == ".\r\n" {
            return Ok(Some(content));
        }
        content.push_str(&line);
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}

async fn converse(mut stream: TcpStream, script: Arc<Script>, log: Log) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    send(&mut writer, &reply(220, "mock.relay ready")).await?;

    loop {
        line.clear();
        let Ok(read) = tokio::time::timeout(IDLE_LIMIT, reader.read_line(&mut line)).await else {
            return Ok(());
        };
        if read? == 0 {
            return Ok(());
        }

        let (answer, command) = script.answer(line.trim_end());
        tracing::debug!(?command, "mock relay received");
        log.lock().await.push(command.clone());
        send(&mut writer, &answer).await?;

        match command {
            SmtpCommand::Quit => return Ok(()),
            SmtpCommand::Data => {
                let Some(content) = read_content(&mut reader).await? else {
                    return Ok(());
                };
                log.lock().await.push(SmtpCommand::MessageContent(content));

                let (code, text) = &script.end_of_data;
                send(&mut writer, &reply(*code, text)).await?;
            }
            _ => {}
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    log: Log,
    connections: Arc<AtomicUsize>,
    acceptor: JoinHandle<()>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.log.lock().await.clone()
    }

    /// Content of every message that reached the terminating dot.
    pub async fn messages(&self) -> Vec<String> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting. Conversations already open run to completion.
    pub fn shutdown(&self) {
        self.acceptor.abort();
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    /// Refuse RCPT TO for `address` with 550.
    #[must_use]
    pub fn rejecting_recipient(mut self, address: impl Into<String>) -> Self {
        self.script.refused.insert(address.into());
        self
    }

    /// Replace the reply to the end of message content.
    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, text: impl Into<String>) -> Self {
        self.script.end_of_data = (code, text.into());
        self
    }

    /// Replace the extensions listed after the EHLO greeting line.
    #[must_use]
    pub fn with_capabilities(mut self, extensions: Vec<String>) -> Self {
        self.script.extensions = extensions;
        self
    }

    /// Bind an ephemeral loopback port and start accepting.
    ///
    /// # Errors
    ///
    /// If the listener cannot be bound.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let log = Log::default();
        let connections = Arc::new(AtomicUsize::new(0));

        let acceptor = tokio::spawn({
            let log = Arc::clone(&log);
            let connections = Arc::clone(&connections);

            async move {
                while let Ok((stream, _peer)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);

                    let conversation = converse(stream, Arc::clone(&script), Arc::clone(&log));
                    tokio::spawn(async move {
                        if let Err(err) = conversation.await {
                            tracing::debug!(%err, "mock relay connection ended");
                        }
                    });
                }
            }
        });

        Ok(MockSmtpServer {
            addr,
            log,
            connections,
            acceptor,
        })
    }
}
