//! CLI-specific error types and exit code mapping

use nfguard_core::error::NfguardError;
use nfguard_firewall::FirewallError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Rule installation, removal, or listing failed.
    #[error("firewall error: {0}")]
    Firewall(String),

    /// `status` found the interception rules missing.
    #[error("interception rules are not loaded")]
    RulesMissing,

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from nfguard-core.
    #[error("{0}")]
    Core(#[from] NfguardError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                        |
    /// |------|--------------------------------|
    /// | 0    | Success                        |
    /// | 1    | General / command error        |
    /// | 2    | Configuration error            |
    /// | 3    | Interception rules not loaded  |
    /// | 4    | Firewall tool failure          |
    /// | 10   | IO error                       |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(NfguardError::Config(_)) => 2,
            Self::RulesMissing => 3,
            Self::Firewall(_) | Self::Core(NfguardError::Firewall(_)) => 4,
            Self::Io(_) | Self::Core(NfguardError::Io(_)) => 10,
            Self::JsonSerialize(_) | Self::Command(_) => 1,
        }
    }
}

impl From<FirewallError> for CliError {
    fn from(e: FirewallError) -> Self {
        match e {
            FirewallError::Config { .. } => Self::Config(e.to_string()),
            _ => Self::Firewall(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfguard_core::error::ConfigError;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_core_config_error() {
        let err: CliError = NfguardError::Config(ConfigError::FileNotFound {
            path: "nfguard.toml".to_owned(),
        })
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_rules_missing() {
        assert_eq!(CliError::RulesMissing.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_firewall_error() {
        let err: CliError = FirewallError::Execution {
            tool: "iptables".to_owned(),
            command: "-A OUTPUT".to_owned(),
            reason: "Permission denied (you must be root)".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("you must be root"));
    }

    #[test]
    fn test_firewall_config_error_maps_to_config() {
        let err: CliError = FirewallError::Config {
            field: "check_interval_secs".to_owned(),
            reason: "must be 1-3600".to_owned(),
        }
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_io_error() {
        let err = CliError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert_eq!(err.exit_code(), 10);
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "test error");
    }
}
