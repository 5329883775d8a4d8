//! Command-line interface for nport-bridge
//!
//! ```text
//! cli/
//! ├── args.rs       # Gateway, listener and timeout settings
//! └── error.rs      # User-friendly error display
//! ```

pub mod args;
pub mod error;

use std::io::IsTerminal;

use clap::Parser;

use crate::error::BridgeResult;
use crate::logging::{LogFormat, LoggingConfig};
use crate::runtime::Bridge;

/// nport-bridge - serialized TCP access to a shared RS-485 bus
///
/// Relays raw TCP clients and a second bus participant to one device bus
/// behind a serial device server, one exchange at a time.
#[derive(Parser, Debug)]
#[command(
    name = "nport-bridge",
    version,
    about = "Serialized TCP bridge for a shared RS-485 bus",
    long_about = "Accepts TCP clients and a second serial gateway and funnels their traffic\n\
                  to one device bus, holding the bus for exactly one request/response at a time."
)]
pub struct Cli {
    /// Bridge settings
    #[command(flatten)]
    pub settings: args::SettingsArgs,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log errors only
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Cli {
    /// Run the bridge until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns `BridgeError` if the configuration is invalid or the bridge
    /// cannot start.
    pub async fn execute(self) -> BridgeResult<()> {
        if self.no_color || !std::io::stderr().is_terminal() {
            colored::control::set_override(false);
        }

        let config = self.settings.into_config()?;

        if self.print_config {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }

        LoggingConfig::from_verbosity(self.verbose, self.quiet, self.log_format).init()?;

        let bridge = Bridge::new(config).start().await?;
        bridge.run_until_signal().await;
        Ok(())
    }
}
