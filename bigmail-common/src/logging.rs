//! Log channels and subscriber setup.
//!
//! Events are grouped into three channels, each emitted inside a span named
//! after it: `outgoing` for commands written to the relay, `incoming` for
//! replies read back, and `internal` for dispatcher and worker lifecycle.
//! Channels log at TRACE unless given `level = ...` first.

use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, fmt::time::ChronoUtc, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Environment variable consulted for the log level.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

#[doc(hidden)]
#[macro_export]
macro_rules! __channel {
    ($channel:literal, level = $level:ident, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($crate::tracing::Level::$level, $channel);
        let _entered = span.enter();

        $crate::tracing::event!($crate::tracing::Level::$level, $($msg)*)
    }};

    ($channel:literal, $($msg:tt)*) => {
        $crate::__channel!($channel, level = TRACE, $($msg)*)
    };
}

#[macro_export]
macro_rules! outgoing {
    ($($msg:tt)*) => { $crate::__channel!("outgoing", $($msg)*) };
}

#[macro_export]
macro_rules! incoming {
    ($($msg:tt)*) => { $crate::__channel!("incoming", $($msg)*) };
}

#[macro_export]
macro_rules! internal {
    ($($msg:tt)*) => { $crate::__channel!("internal", $($msg)*) };
}

const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Resolve a level from the raw value of [`LOG_LEVEL_ENV`].
///
/// Unknown values fall back to the build default with a note on stderr,
/// since no subscriber is installed yet.
#[must_use]
pub fn level_from(raw: Option<&str>) -> LevelFilter {
    let Some(raw) = raw else {
        return default_level();
    };

    LevelFilter::from_str(raw).unwrap_or_else(|_| {
        let fallback = default_level();
        eprintln!("Ignoring {LOG_LEVEL_ENV}={raw:?}, using {fallback}");
        fallback
    })
}

fn own_targets(metadata: &tracing::Metadata<'_>) -> bool {
    metadata.target().starts_with("bigmail")
}

/// Install the global subscriber. Events from other crates are dropped.
pub fn init() {
    let level = level_from(std::env::var(LOG_LEVEL_ENV).ok().as_deref());

    let format = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(true)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(ChronoUtc::rfc_3339());

    tracing_subscriber::registry()
        .with(format.with_filter(level).with_filter(FilterFn::new(own_targets)))
        .init();
}
