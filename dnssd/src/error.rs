//! Utilities regarding error handling

use std::io;
use thiserror::Error;

/// Result type for the dnssd crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for the dnssd crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A service identity component could not be encoded or a fullname could not be decoded
    #[error("invalid service name: {0}")]
    InvalidName(String),
    /// An instance of `crate::ServiceType` could not be created due to an invalid format
    #[error("Invalid ServiceType format: {0}")]
    InvalidServiceType(String),
    /// A TXT record key or value violates the record format
    #[error("invalid TXT record entry: {0}")]
    InvalidTxtEntry(String),
    /// The encoded TXT record would exceed 65535 bytes
    #[error("TXT record too large: {size} bytes (max 65535)")]
    RecordTooLarge { size: usize },
    /// No network interface matched the requested name or index
    #[error("unknown network interface: {0}")]
    UnknownInterface(String),
    /// The connection to the responder daemon failed; terminal for every open transaction
    #[error("{message} (code: {code})")]
    Transport { code: i32, message: String },
    /// The responder daemon reported an error for a transaction
    #[error("{message} (code: {code})")]
    MdnsSystemError { code: i32, message: String },
    /// An error occurred in the underlying system (ABI)
    #[error("{message} (code: {code})")]
    SystemError { code: i32, message: String },
    /// A frame received from the daemon could not be decoded
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A request was rejected before being sent
    #[error("{0}")]
    InvalidRequest(String),
}

impl Error {
    /// Returns true if this error ends the transaction it was delivered to.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::MdnsSystemError { .. }
        )
    }

    /// Builds an `Error::MdnsSystemError` from a daemon error code.
    pub fn from_daemon_code(code: i32) -> Self {
        Error::MdnsSystemError {
            code,
            message: daemon_error_message(code).to_string(),
        }
    }

    pub(crate) fn connection_closed() -> Self {
        Error::Transport {
            code: libc::ECONNRESET,
            message: "connection closed by daemon".to_string(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for Error {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Error::InvalidRequest(format!("`{}` must be initialized", err.field_name()))
    }
}

/// Returns the message associated with the specified daemon error code.
pub fn daemon_error_message(code: i32) -> &'static str {
    match code {
        0 => "no error",
        -65537 => "unknown error",
        -65538 => "no such name",
        -65539 => "out of memory",
        -65540 => "bad parameter",
        -65541 => "bad reference",
        -65542 => "bad state",
        -65543 => "bad flags",
        -65544 => "unsupported",
        -65545 => "not initialized",
        -65547 => "already registered",
        -65548 => "name conflict",
        -65549 => "invalid",
        -65550 => "firewall",
        -65551 => "incompatible",
        -65552 => "bad interface index",
        -65553 => "refused",
        -65554 => "no such record",
        -65555 => "no auth",
        -65556 => "no such key",
        -65557 => "NAT traversal",
        -65558 => "double NAT",
        -65559 => "bad time",
        -65563 => "service not running",
        -65568 => "timeout",
        _ => "unrecognized error",
    }
}
