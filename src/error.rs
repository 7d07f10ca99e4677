//! Error types for provisioning operations.

/// Main error type for provisioning operations
///
/// The `Display` text of every variant is the single-line description the
/// binary prints as `Error: <description>!` before exiting with code 1.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Target container name is already taken; nothing was created
    #[error("Container {name} already exists")]
    AlreadyExists { name: String },
    /// A container backend operation (create/start/stop/config) reported failure
    #[error("{description}")]
    Provider { description: String },
    /// The container never obtained a network address within the polling bound
    #[error("No address assigned within {timeout_secs} seconds")]
    AddressTimeout { timeout_secs: u64 },
    /// A provisioning step exited with a non-zero status inside the container
    #[error("{description}")]
    StepFailed { description: String },
    /// Step runner precondition: the container must exist and be running
    #[error("Container does not exist or is not running")]
    NotRunning,
    /// A step was built with an empty argument vector
    #[error("Step {description:?} has an empty command")]
    InvalidCommand { description: String },
    /// The host-side half of a piped step could not be spawned or attached
    #[error("Failed to run host command {program}")]
    HostCommand {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Writing a host-side artifact (launcher script) failed
    #[error("{description}")]
    HostFile {
        description: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Shorthand for a provider operation failure.
    pub fn provider(description: impl Into<String>) -> Self {
        Self::Provider {
            description: description.into(),
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_lines_match_cli_contract() {
        let err = ProvisionError::AlreadyExists {
            name: "acme_postgresql_bookworm".to_string(),
        };
        assert_eq!(
            format!("Error: {}!", err),
            "Error: Container acme_postgresql_bookworm already exists!"
        );

        let err = ProvisionError::StepFailed {
            description: "Updating apt".to_string(),
        };
        assert_eq!(format!("Error: {}!", err), "Error: Updating apt!");
    }

    #[test]
    fn test_timeout_display() {
        let err = ProvisionError::AddressTimeout { timeout_secs: 120 };
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn test_host_command_keeps_source() {
        let err = ProvisionError::HostCommand {
            program: "curl".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("curl"));
    }
}
