//! Logging initialization
//!
//! Logs go to stderr so `--print-config` output on stdout stays clean.
//! `RUST_LOG` always wins over the level picked from the command line.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

use crate::error::{BridgeError, BridgeResult};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Map `-q` / `-v` flags to a level
    pub fn from_verbosity(verbose: u8, quiet: bool, format: LogFormat) -> Self {
        let level = if quiet {
            Level::ERROR
        } else {
            match verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };
        Self { level, format }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if a subscriber is already set.
    pub fn init(&self) -> BridgeResult<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()));
        let subscriber = tracing_subscriber::registry().with(filter);

        let result = match self.format {
            LogFormat::Text => subscriber
                .with(tracing_fmt::layer().with_target(false).with_writer(io::stderr))
                .try_init(),
            LogFormat::Json => subscriber
                .with(tracing_fmt::layer().json().with_writer(io::stderr))
                .try_init(),
        };

        result.map_err(|e| BridgeError::configuration(format!("Cannot initialize logging: {e}")))
    }
}
