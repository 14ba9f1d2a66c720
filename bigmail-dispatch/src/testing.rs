//! In-memory sessions for exercising senders and the dispatcher.

#![allow(clippy::unwrap_used)]

use std::{
    collections::HashSet,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bigmail_smtp::{ClientError, Connector, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MailFrom(String),
    RcptTo(String),
    Data,
    Body(String),
    EndData,
    Quit,
}

#[derive(Debug, Clone)]
pub enum Behaviour {
    /// The `n`th MAIL FROM of the job, counting from 1, is answered with 550.
    RejectSender(usize),
    /// RCPT TO for this address is answered with 550.
    RejectRecipient(String),
    /// DATA for a message to this address is answered with 451.
    RejectData(String),
    /// Writing the content of a message to this address breaks the pipe.
    FailWrite(String),
    /// The end-of-data reply for a message to this address is 554.
    RejectBody(String),
    /// Every connection attempt after the first `n` fails.
    RefuseAfter(usize),
    /// Every connection after the first `n` takes this long to establish.
    SlowConnectAfter(usize, Duration),
}

#[derive(Debug, Default)]
struct State {
    rejected_sender: Option<usize>,
    rejected_recipients: HashSet<String>,
    rejected_data: HashSet<String>,
    failed_writes: HashSet<String>,
    rejected_bodies: HashSet<String>,
    refuse_after: Option<usize>,
    slow_connect: Option<(usize, Duration)>,
    connects: usize,
    mail_transactions: usize,
    open: usize,
    commands: Vec<Command>,
    delivered: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<State>>,
}

impl MockConnector {
    #[must_use]
    pub fn with(self, behaviour: Behaviour) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            match behaviour {
                Behaviour::RejectSender(n) => state.rejected_sender = Some(n),
                Behaviour::RejectRecipient(address) => {
                    state.rejected_recipients.insert(address);
                }
                Behaviour::RejectData(address) => {
                    state.rejected_data.insert(address);
                }
                Behaviour::FailWrite(address) => {
                    state.failed_writes.insert(address);
                }
                Behaviour::RejectBody(address) => {
                    state.rejected_bodies.insert(address);
                }
                Behaviour::RefuseAfter(n) => state.refuse_after = Some(n),
                Behaviour::SlowConnectAfter(n, delay) => state.slow_connect = Some((n, delay)),
            }
        }
        self
    }

    /// A session that bypasses the connection count.
    pub fn session(&self) -> MockSession {
        self.state.lock().unwrap().open += 1;
        MockSession {
            state: Arc::clone(&self.state),
            recipients: Vec::new(),
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Recipients whose message was committed, in commit order.
    pub fn delivered(&self) -> Vec<String> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Successful connection attempts.
    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn quits(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| **c == Command::Quit)
            .count()
    }

    /// Sessions created and not yet dropped. A sender owns its session for
    /// its whole life, so this is the number of live senders.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().open
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession, ClientError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            if state.refuse_after.is_some_and(|n| state.connects >= n) {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            state.connects += 1;

            let connects = state.connects;
            state
                .slow_connect
                .and_then(|(after, delay)| (connects > after).then_some(delay))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self.session())
    }
}

pub struct MockSession {
    state: Arc<Mutex<State>>,
    recipients: Vec<String>,
}

impl MockSession {
    fn record(&self, command: Command) {
        self.state.lock().unwrap().commands.push(command);
    }

    fn addressed_to_any(&self, addresses: &HashSet<String>) -> bool {
        self.recipients.iter().any(|r| addresses.contains(r))
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open -= 1;
        }
    }
}

fn rejected(code: u16) -> ClientError {
    ClientError::Rejected {
        code,
        message: "Rejected".to_string(),
    }
}

#[async_trait]
impl Session for MockSession {
    async fn declare_sender(&mut self, address: &str) -> Result<(), ClientError> {
        self.recipients.clear();
        self.record(Command::MailFrom(address.to_string()));

        let mut state = self.state.lock().unwrap();
        state.mail_transactions += 1;
        if state.rejected_sender == Some(state.mail_transactions) {
            return Err(rejected(550));
        }
        Ok(())
    }

    async fn declare_recipient(&mut self, address: &str) -> Result<(), ClientError> {
        self.record(Command::RcptTo(address.to_string()));
        if self.state.lock().unwrap().rejected_recipients.contains(address) {
            return Err(rejected(550));
        }
        self.recipients.push(address.to_string());
        Ok(())
    }

    async fn open_body(&mut self) -> Result<(), ClientError> {
        self.record(Command::Data);
        if self.addressed_to_any(&self.state.lock().unwrap().rejected_data) {
            return Err(rejected(451));
        }
        Ok(())
    }

    async fn write_body(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.record(Command::Body(String::from_utf8_lossy(bytes).into_owned()));
        if self.addressed_to_any(&self.state.lock().unwrap().failed_writes) {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "broken pipe",
            )));
        }
        Ok(())
    }

    async fn close_body(&mut self) -> Result<(), ClientError> {
        self.record(Command::EndData);

        let mut state = self.state.lock().unwrap();
        if self.addressed_to_any(&state.rejected_bodies) {
            return Err(rejected(554));
        }
        state.delivered.extend(self.recipients.drain(..));
        Ok(())
    }

    async fn quit(&mut self) {
        self.record(Command::Quit);
    }
}
