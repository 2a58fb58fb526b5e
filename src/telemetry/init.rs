// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber installation for the `toolbridge` binary.

use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// How log lines are laid out on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogStyle {
    /// One short line per event.
    #[default]
    Compact,
    /// Multi-field lines with file/line and span enter/close events, for
    /// following a connection through its handshake.
    Full,
}

/// Logging options chosen on the command line.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Level used when neither a filter nor `RUST_LOG` is given.
    pub level: Level,

    pub style: LogStyle,

    /// Explicit `EnvFilter` directive; wins over `RUST_LOG`.
    pub filter: Option<String>,

    /// ANSI colors in log output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            style: LogStyle::Compact,
            filter: None,
            ansi: io::stderr().is_terminal(),
        }
    }
}

impl TelemetryConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Map a `-v` count onto a level: 0 keeps the current one, 1 is debug,
    /// more is trace.
    pub fn with_verbosity(self, verbose: u8) -> Self {
        let level = match verbose {
            0 => self.level,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self.with_level(level)
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_style(mut self, style: LogStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// The directive the subscriber will use, given the value of `RUST_LOG`.
    fn directive(&self, rust_log: Option<String>) -> String {
        self.filter
            .clone()
            .or(rust_log.filter(|v| !v.trim().is_empty()))
            .unwrap_or_else(|| self.level.to_string().to_lowercase())
    }
}

/// Guard returned by [`init_telemetry`].
pub struct TelemetryGuard {
    directive: String,
}

impl TelemetryGuard {
    /// The filter directive that was installed.
    pub fn directive(&self) -> &str {
        &self.directive
    }
}

/// Install the global subscriber. Logs go to stderr; stdout is reserved for
/// command output. Fails if a subscriber is already installed or the
/// directive does not parse.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let directive = config.directive(std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{directive}: {e}")))?;

    let full = config.style == LogStyle::Full;
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi)
        .with_file(full)
        .with_line_number(full)
        .with_span_events(if full {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    let installed = match config.style {
        LogStyle::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.compact())
            .try_init(),
        LogStyle::Full => tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init(),
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(TelemetryGuard { directive })
}
