//! The bigmail worker pool.
//!
//! A [`Dispatcher`] feeds one message per recipient to a pool of senders,
//! each owning a single SMTP session. Senders take work through a
//! rendezvous queue, so a message only leaves the feeder when a sender is
//! ready for it. A sender whose delivery fails reports the message and
//! terminates; while there is still work to hand out it is replaced.

mod dispatcher;
mod error;
pub mod pool;
pub mod queue;
mod report;
pub mod sender;
pub mod source;

#[cfg(test)]
mod testing;

pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::DispatchError;
pub use report::JobReport;
pub use source::{LineSource, RecipientSource, VecSource};
