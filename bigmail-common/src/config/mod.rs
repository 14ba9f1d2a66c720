//! Configuration shared between the SMTP client and the dispatcher.

pub mod timeouts;

pub use timeouts::ClientTimeouts;
