//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use tileseed::agent::AgentError;
use tileseed::config::ConfigFileError;
use tileseed::job::JobError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Invalid command-line argument
    InvalidArgument(String),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Render job could not run
    Job(JobError),
    /// Some tiles of a job failed
    TilesFailed { failed: u64, message: String },
    /// Agent error
    Agent(AgentError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Job(JobError::Store(_)) => {
                eprintln!();
                eprintln!("Check that:");
                eprintln!("  1. --store points at the store directory");
                eprintln!("  2. The dataset's entity or explicit layout exists");
            }
            CliError::Agent(AgentError::Queue(_)) => {
                eprintln!();
                eprintln!("Check that the job queue is reachable (--queue-url)");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Job(e) => write!(f, "Render job failed: {}", e),
            CliError::TilesFailed { failed, message } => {
                write!(f, "{} tiles failed to render: {}", failed, message)
            }
            CliError::Agent(e) => write!(f, "Agent error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Runtime(e) => Some(e),
            CliError::Job(e) => Some(e),
            CliError::Agent(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<JobError> for CliError {
    fn from(e: JobError) -> Self {
        CliError::Job(e)
    }
}

impl From<AgentError> for CliError {
    fn from(e: AgentError) -> Self {
        CliError::Agent(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err: CliError = ConfigFileError::InvalidValue {
            section: "agent".into(),
            key: "ratio".into(),
            value: "3".into(),
            reason: "must be one of: 1, 2, 4, 8".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration: agent.ratio = '3' - must be one of: 1, 2, 4, 8"
        );
    }

    #[test]
    fn test_tiles_failed_message() {
        let err = CliError::TilesFailed {
            failed: 2,
            message: "a | b".into(),
        };
        assert_eq!(err.to_string(), "2 tiles failed to render: a | b");
    }

    #[test]
    fn test_job_error_has_source() {
        use std::error::Error;
        let err = CliError::from(JobError::UnsupportedTilingMatrix("Foo".into()));
        assert!(err.source().is_some());
    }
}
