//! dankchat CLI - command-line client for anonymous messaging over a public relay
//!
//! This crate provides a command-line interface for:
//! - Creating and showing the local identity
//! - Sending messages and retrying failed publishes
//! - Scanning the relay and listing conversations

pub mod cli;
pub mod client;
pub mod config;
pub mod output;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use dank_core::relay::RelayError;
use dank_core::CoreError;

/// Exit codes for CLI operations
///
/// Exit codes provide machine-readable status for scripting:
/// - 0: Success - operation completed successfully
/// - 1: General error - unspecified error occurred
/// - 2: Not registered - run `dank init` first
/// - 4: Relay unreachable - the relay could not be reached or rejected the request
/// - 5: Invalid input - bad arguments, unknown recipient or malformed key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed successfully (exit code 0)
    Success = 0,
    /// General error (exit code 1)
    GeneralError = 1,
    /// No identity key on this device (exit code 2)
    NotRegistered = 2,
    /// Relay unreachable or failing (exit code 4)
    RelayUnreachable = 4,
    /// Invalid input provided (exit code 5)
    InvalidInput = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::NotRegistered => "NOT_REGISTERED",
            ExitCode::RelayUnreachable => "RELAY_UNREACHABLE",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }

    /// Get a human-readable description of the exit code
    pub fn description(&self) -> &'static str {
        match self {
            ExitCode::Success => "Operation completed successfully",
            ExitCode::GeneralError => "An unspecified error occurred",
            ExitCode::NotRegistered => "No identity key found; run `dank init`",
            ExitCode::RelayUnreachable => "The relay could not be reached",
            ExitCode::InvalidInput => "Invalid arguments or data provided",
        }
    }
}

/// Map a command failure to its exit code.
pub fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    if let Some(core) = error.downcast_ref::<CoreError>() {
        return match core {
            CoreError::NotRegistered => ExitCode::NotRegistered,
            CoreError::Relay(_) => ExitCode::RelayUnreachable,
            CoreError::UnknownRecipient(_) | CoreError::Key(_) | CoreError::AlreadyRegistered(_) => {
                ExitCode::InvalidInput
            }
            _ => ExitCode::GeneralError,
        };
    }
    if error.downcast_ref::<RelayError>().is_some() {
        return ExitCode::RelayUnreachable;
    }
    ExitCode::GeneralError
}
