pub mod config;
pub mod logging;
pub mod message;

pub use message::{Message, MessageError, Template};
pub use tracing;
