//! Job configuration: an optional RON file, overridden by command-line
//! flags.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use bigmail_common::config::ClientTimeouts;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Everything a job needs, fixed at startup.
///
/// ```ron
/// (
///     server: "smtp.example.com:587",
///     workers: 4,
///     pacing_ms: 250,
///     from: "news@example.com",
///     subject: "Monthly update",
///     content: "./mail.txt",
///     list: "./recipients.txt",
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Relay address, `host:port`.
    #[serde(default)]
    pub server: String,

    /// Number of concurrent connections.
    ///
    /// Default: 1
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Upgrade every connection with STARTTLS.
    ///
    /// Default: true
    #[serde(default = "defaults::use_tls")]
    pub use_tls: bool,

    /// Pause per connection between two sends. Written as `pacing_ms`,
    /// fractions allowed.
    ///
    /// Default: 0 (no pacing)
    #[serde(rename = "pacing_ms", default, with = "millis")]
    pub pacing: Duration,

    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub subject: Option<String>,

    /// File holding the message body.
    #[serde(default)]
    pub content: PathBuf,

    /// File holding one recipient address per line.
    #[serde(default)]
    pub list: PathBuf,

    /// Name announced in EHLO.
    ///
    /// Default: "localhost"
    #[serde(default = "defaults::helo")]
    pub helo: String,

    /// Skip certificate verification after STARTTLS. Only for test relays.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            workers: defaults::workers(),
            use_tls: defaults::use_tls(),
            pacing: Duration::ZERO,
            from: String::new(),
            subject: None,
            content: PathBuf::new(),
            list: PathBuf::new(),
            helo: defaults::helo(),
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }
}

/// Settings given on the command line. `None` leaves the configured value
/// alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub workers: Option<usize>,
    pub use_tls: Option<bool>,
    pub pacing: Option<Duration>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub content: Option<PathBuf>,
    pub list: Option<PathBuf>,
    pub helo: Option<String>,
    pub accept_invalid_certs: bool,
}

impl JobConfig {
    /// Parse a RON document. `Option` fields may be written without `Some`.
    ///
    /// # Errors
    ///
    /// If the document is not a valid configuration.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(text)?)
    }

    /// # Errors
    ///
    /// If the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron(&text)
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(server) = overrides.server {
            self.server = server;
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
        if let Some(use_tls) = overrides.use_tls {
            self.use_tls = use_tls;
        }
        if let Some(pacing) = overrides.pacing {
            self.pacing = pacing;
        }
        if let Some(from) = overrides.from {
            self.from = from;
        }
        if overrides.subject.is_some() {
            self.subject = overrides.subject;
        }
        if let Some(content) = overrides.content {
            self.content = content;
        }
        if let Some(list) = overrides.list {
            self.list = list;
        }
        if let Some(helo) = overrides.helo {
            self.helo = helo;
        }
        self.accept_invalid_certs |= overrides.accept_invalid_certs;
        self
    }

    #[must_use]
    pub const fn pacing(&self) -> Duration {
        self.pacing
    }

    /// # Errors
    ///
    /// If a required setting is missing or the pool would be empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::Missing("server"));
        }
        if self.from.trim().is_empty() {
            return Err(ConfigError::Missing("from"));
        }
        if self.content.as_os_str().is_empty() {
            return Err(ConfigError::Missing("content"));
        }
        if self.list.as_os_str().is_empty() {
            return Err(ConfigError::Missing("list"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration such as `250ms`, `2s`, `1m30s`, `1.5s` or `500us`. A
/// bare `0` is accepted; any other number needs a unit. The result is exact
/// to the nanosecond.
///
/// # Errors
///
/// If the text is not a duration.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = text;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {text:?}"))?;
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number in duration {text:?}"))?;
        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            _ => return Err(format!("unknown unit {unit:?} in duration {text:?}")),
        };

        let nanos = (value * nanos_per_unit).round();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Err(format!("duration {text:?} out of range"));
        }
        total = total
            .checked_add(Duration::from_nanos(nanos as u64))
            .ok_or_else(|| format!("duration {text:?} out of range"))?;
        rest = tail;
    }

    Ok(total)
}

/// `pacing_ms` in RON: whole or fractional milliseconds.
mod millis {
    use std::{fmt, time::Duration};

    use serde::{
        Deserializer, Serializer,
        de::{self, Visitor},
    };

    #[allow(clippy::cast_precision_loss, clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(pacing: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if pacing.subsec_nanos() % 1_000_000 == 0
            && let Ok(whole) = u64::try_from(pacing.as_millis())
        {
            return serializer.serialize_u64(whole);
        }
        serializer.serialize_f64(pacing.as_nanos() as f64 / 1e6)
    }

    struct Millis;

    impl Visitor<'_> for Millis {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative number of milliseconds")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_millis)
                .map_err(|_| E::custom("pacing_ms cannot be negative"))
        }

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_precision_loss,
            clippy::cast_sign_loss
        )]
        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
            let nanos = (value * 1e6).round();
            if !(nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64) {
                return Err(E::custom("pacing_ms out of range"));
            }
            Ok(Duration::from_nanos(nanos as u64))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(Millis)
    }
}

mod defaults {
    pub const fn workers() -> usize {
        1
    }

    pub const fn use_tls() -> bool {
        true
    }

    pub fn helo() -> String {
        "localhost".to_string()
    }
}
