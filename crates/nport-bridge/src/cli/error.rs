//! User-friendly error formatting for CLI
//!
//! Converts fatal bridge errors into human-readable messages with a
//! suggestion line.

use colored::Colorize;

use crate::error::BridgeError;

fn with_suggestion(title: &str, detail: &str, suggestion: &str) -> String {
    format!(
        "{} {}\n  {}\n\n{}\n  {}",
        "✗".red().bold(),
        title,
        detail,
        "Suggestion:".yellow(),
        suggestion
    )
}

/// Format an error for CLI display
#[must_use]
pub fn format_error(error: &BridgeError) -> String {
    match error {
        BridgeError::Configuration { message, key } => {
            let suggestion = match key {
                Some(key) => format!("Check the --{} flag or the {key} variable", flag_for(key)),
                None => "Run with --help to see all available options".to_string(),
            };
            with_suggestion("Configuration error", message, &suggestion)
        }
        BridgeError::Connect { endpoint, message } => with_suggestion(
            &format!("Cannot reach {endpoint} gateway"),
            message,
            "Check that the serial device server is reachable and in TCP server mode",
        ),
        BridgeError::Bind { address, source } => with_suggestion(
            &format!("Cannot listen on {address}"),
            &source.to_string(),
            "Another process may hold the port; pick a different --listen-port",
        ),
        BridgeError::Io(err) => with_suggestion(
            "I/O error",
            &err.to_string(),
            "Check network interfaces and file descriptor limits",
        ),
        _ => format!("{} {}", "✗".red().bold(), error),
    }
}

/// Flag name for a setting's environment variable
fn flag_for(key: &str) -> &'static str {
    match key {
        "NPORT1_HOST" => "nport1-host",
        "NPORT2_HOST" => "nport2-host",
        "LISTEN_HOST" => "listen-host",
        "MODBUS_TIMEOUT" => "timeout",
        _ => "help",
    }
}

/// Display an error to stderr and return exit code
#[must_use]
pub fn display_error(error: &BridgeError) -> i32 {
    eprintln!("{}", format_error(error));
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EndpointRole;

    #[test]
    fn test_configuration_error_names_setting() {
        colored::control::set_override(false);
        let error = BridgeError::configuration_with_key("timeout must be between 1 and 3600 seconds", "MODBUS_TIMEOUT");
        let formatted = format_error(&error);
        assert!(formatted.contains("Configuration error"));
        assert!(formatted.contains("--timeout"));
        assert!(formatted.contains("MODBUS_TIMEOUT"));
    }

    #[test]
    fn test_connect_error_formatting() {
        colored::control::set_override(false);
        let error = BridgeError::connect(EndpointRole::Primary, "connection refused");
        let formatted = format_error(&error);
        assert!(formatted.contains("Cannot reach primary gateway"));
        assert!(formatted.contains("connection refused"));
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(display_error(&BridgeError::configuration("bad")), 1);
    }
}
