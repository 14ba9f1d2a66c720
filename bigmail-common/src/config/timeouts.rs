//! Timeouts applied by the SMTP client to each protocol step.
//!
//! The dispatcher never cancels a delivery itself; a step that runs past its
//! timeout surfaces as an ordinary step failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side SMTP timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection and reading the greeting.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Timeout for EHLO, STARTTLS, MAIL FROM and RCPT TO.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// Timeout for DATA, the body transfer and the end-of-data reply.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,

    /// Timeout for QUIT.
    ///
    /// Default: 10 seconds (a late QUIT never fails anything)
    #[serde(default = "defaults::quit_secs")]
    pub quit_secs: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
            quit_secs: defaults::quit_secs(),
        }
    }
}

impl ClientTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn command_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }

    pub const fn quit_secs() -> u64 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let timeouts = ClientTimeouts::default();
        assert_eq!(timeouts.connect(), Duration::from_secs(30));
        assert_eq!(timeouts.command(), Duration::from_secs(30));
        assert_eq!(timeouts.data(), Duration::from_secs(120));
        assert_eq!(timeouts.quit(), Duration::from_secs(10));
    }
}
