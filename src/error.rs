//! Error types for the MTS client.

use thiserror::Error;

/// Errors from tuning-table store operations.
///
/// The store refuses silently-corrupting writes: a rejected batch leaves
/// the prior table untouched.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum TableError {
    #[error("Note index {0} out of range (0-127)")]
    InvalidIndex(u8),

    #[error("Invalid frequency {0}. Must be finite and positive")]
    InvalidFrequency(f64),
}

/// Errors from decoding MTS SysEx messages.
///
/// All variants are non-fatal. A SysEx stream carries plenty of messages
/// that are not tuning-related, so the session drops every one of these
/// identically and leaves state unchanged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Message too short ({0} bytes)")]
    TooShort(usize),

    #[error("Not a recognized MTS message")]
    UnrecognizedShape,

    #[error("Checksum mismatch (expected {expected:#04x}, got {actual:#04x})")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("Malformed field: {0}")]
    MalformedField(&'static str),
}

/// Invalid client configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Master timeout must be non-zero")]
    ZeroMasterTimeout,
}

/// The client id has been deregistered (or was never issued).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Client id used after deregistration")]
pub struct UseAfterDeregister;
