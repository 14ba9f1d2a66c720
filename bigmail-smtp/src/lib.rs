//! SMTP delivery for bigmail: a minimal client and the session traits the
//! dispatcher is written against.

pub mod client;
pub mod session;

pub use client::{ClientError, Response, SmtpClient};
pub use session::{Connector, Session, SmtpConnector, SmtpSession};
