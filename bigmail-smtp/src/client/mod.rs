//! A small SMTP client: one connection, one command at a time.
//!
//! # Example
//!
//! ```no_run
//! use bigmail_smtp::client::{Response, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost:2525", "localhost").await?;
//! client.read_greeting().await?.expect(Response::is_success)?;
//! client.ehlo("client.example.com").await?.expect(Response::is_success)?;
//! client.mail_from("sender@example.com").await?.expect(Response::is_success)?;
//! client.rcpt_to("recipient@example.com").await?.expect(Response::is_success)?;
//! client.data().await?.expect(Response::is_intermediate)?;
//! client.write_data(b"Subject: Test\r\n\r\nHello World").await?;
//! client.end_data().await?.expect(Response::is_success)?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

#[allow(clippy::module_inception)]
mod client;
mod data;
mod error;
mod response;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use response::Response;
