//! Bridge settings
//!
//! Every setting is a flag with an environment-variable fallback, so the same
//! binary runs unchanged under systemd unit files and container env blocks.

use clap::Args;

use crate::config::{
    BridgeConfig, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_PRIMARY_HOST,
    DEFAULT_PRIMARY_PORT, DEFAULT_SECONDARY_HOST, DEFAULT_SECONDARY_PORT, DEFAULT_TIMEOUT_SECS,
    EndpointAddress,
};
use crate::error::BridgeResult;

/// Gateway, listener and timeout settings
#[derive(Debug, Clone, Args)]
pub struct SettingsArgs {
    /// Host of the gateway in front of the device bus
    #[arg(long = "nport1-host", env = "NPORT1_HOST", value_name = "HOST", default_value = DEFAULT_PRIMARY_HOST)]
    pub primary_host: String,

    /// Port of the gateway in front of the device bus
    #[arg(long = "nport1-port", env = "NPORT1_PORT", value_name = "PORT", default_value_t = DEFAULT_PRIMARY_PORT)]
    pub primary_port: u16,

    /// Host of the gateway in front of the second bus participant
    #[arg(long = "nport2-host", env = "NPORT2_HOST", value_name = "HOST", default_value = DEFAULT_SECONDARY_HOST)]
    pub secondary_host: String,

    /// Port of the gateway in front of the second bus participant
    #[arg(long = "nport2-port", env = "NPORT2_PORT", value_name = "PORT", default_value_t = DEFAULT_SECONDARY_PORT)]
    pub secondary_port: u16,

    /// Address to accept clients on
    #[arg(long, env = "LISTEN_HOST", value_name = "HOST", default_value = DEFAULT_LISTEN_HOST)]
    pub listen_host: String,

    /// Port to accept clients on
    #[arg(long, env = "LISTEN_PORT", value_name = "PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// Connect and exchange timeout in seconds
    #[arg(long, env = "MODBUS_TIMEOUT", value_name = "SECONDS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,
}

impl SettingsArgs {
    /// Build and validate the bridge configuration
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` if a value is out of range.
    pub fn into_config(self) -> BridgeResult<BridgeConfig> {
        let config = BridgeConfig {
            primary: EndpointAddress::new(self.primary_host, self.primary_port),
            secondary: EndpointAddress::new(self.secondary_host, self.secondary_port),
            listen: EndpointAddress::new(self.listen_host, self.listen_port),
            timeout_secs: self.timeout,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        settings: SettingsArgs,
    }

    fn parse(args: &[&str]) -> Result<SettingsArgs, clap::Error> {
        Harness::try_parse_from(std::iter::once("nport-bridge").chain(args.iter().copied()))
            .map(|h| h.settings)
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let config = parse(&[]).unwrap().into_config().unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_all_settings_override() {
        let config = parse(&[
            "--nport1-host",
            "10.0.0.1",
            "--nport1-port",
            "4101",
            "--nport2-host",
            "10.0.0.2",
            "--nport2-port",
            "4102",
            "--listen-host",
            "127.0.0.1",
            "--listen-port",
            "6000",
            "--timeout",
            "5",
        ])
        .unwrap()
        .into_config()
        .unwrap();

        assert_eq!(
            config,
            BridgeConfig {
                primary: EndpointAddress::new("10.0.0.1", 4101),
                secondary: EndpointAddress::new("10.0.0.2", 4102),
                listen: EndpointAddress::new("127.0.0.1", 6000),
                timeout_secs: 5,
            }
        );
    }

    #[test]
    fn test_non_numeric_values_rejected() {
        for flag in ["--nport1-port", "--nport2-port", "--listen-port", "--timeout"] {
            let err = parse(&[flag, "abc"]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation, "{flag}");
        }
    }

    #[test]
    fn test_out_of_range_port_rejected() {
        assert!(parse(&["--listen-port", "70000"]).is_err());
    }

    #[test]
    fn test_zero_timeout_is_configuration_error() {
        let err = parse(&["--timeout", "0"]).unwrap().into_config().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Configuration { key: Some(ref key), .. } if key == "MODBUS_TIMEOUT"
        ));
    }
}
