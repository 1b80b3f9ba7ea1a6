//! The error type shared by every fallible operation in this crate.

use crate::probe::commands::SendError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to callers of the library.
///
/// Every variant carries a stable [`code`](Error::code) and a
/// [recoverability class](Error::is_recoverable). Recoverable errors indicate
/// wires-not-touching, power glitches or a target mid-reset; the caller may
/// disconnect, wait and retry the whole operation. Within a single operation
/// no automatic retry happens.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No USB device matching the probe filter was found on the bus.
    #[error("no matching CMSIS-DAP probe found")]
    DeviceNotFound,

    /// The probe opened, but SWD negotiation with the target failed.
    #[error("probe connected but SWD negotiation failed: {0}")]
    ConnectionFailed(String),

    /// The debug port did not answer (no ACK or persistent WAIT).
    #[error("target did not respond on the SWD lines")]
    TargetNotConnected,

    /// A DAP command failed or returned less data than requested.
    #[error("DAP transfer failed: {0}")]
    TransferFailed(String),

    /// An operation-specific deadline expired.
    #[error("operation timed out")]
    Timeout,

    /// Caller-supplied data is unusable (wrong length, failed patch verify,
    /// malformed patch file or archive).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// CTRL-AP ERASEALLSTATUS did not clear within its budget.
    #[error("chip erase did not complete")]
    EraseFailed,

    /// The NVMC rejected or mangled a write.
    #[error("non-volatile memory write failed: {0}")]
    WriteFailed(String),

    /// Post-write readback compared unequal.
    #[error("verification failed: {mismatches} mismatched words")]
    VerifyFailed { mismatches: usize },

    /// The operation was cancelled through its [`CancelToken`].
    ///
    /// [`CancelToken`]: crate::ops::CancelToken
    #[error("operation cancelled")]
    Cancelled,

    /// Host-side I/O failure (files, archive members).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DeviceNotFound => "DEVICE_NOT_FOUND",
            Error::ConnectionFailed(_) => "CONNECTION_FAILED",
            Error::TargetNotConnected => "TARGET_NOT_CONNECTED",
            Error::TransferFailed(_) => "TRANSFER_FAILED",
            Error::Timeout => "TIMEOUT",
            Error::InvalidData(_) => "INVALID_DATA",
            Error::EraseFailed => "ERASE_FAILED",
            Error::WriteFailed(_) => "WRITE_FAILED",
            Error::VerifyFailed { .. } => "VERIFY_FAILED",
            Error::Cancelled => "CANCELLED",
            Error::Io(_) => "UNKNOWN",
            Error::Other(_) => "UNKNOWN",
        }
    }

    /// Whether a disconnect + reconnect + retry of the whole operation is a
    /// sensible reaction to this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TargetNotConnected | Error::TransferFailed(_) | Error::Timeout
        )
    }
}

impl From<SendError> for Error {
    fn from(error: SendError) -> Self {
        match error {
            SendError::Timeout => Error::Timeout,
            other => Error::TransferFailed(other.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(error: zip::result::ZipError) -> Self {
        Error::InvalidData(format!("archive: {error}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::InvalidData(format!("JSON: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classes() {
        assert!(Error::TargetNotConnected.is_recoverable());
        assert!(Error::TransferFailed("count mismatch".into()).is_recoverable());
        assert!(Error::Timeout.is_recoverable());

        assert!(!Error::DeviceNotFound.is_recoverable());
        assert!(!Error::EraseFailed.is_recoverable());
        assert!(!Error::VerifyFailed { mismatches: 3 }.is_recoverable());
        assert!(!Error::InvalidData("short buffer".into()).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::DeviceNotFound.code(), "DEVICE_NOT_FOUND");
        assert_eq!(Error::Timeout.code(), "TIMEOUT");
        assert_eq!(Error::VerifyFailed { mismatches: 1 }.code(), "VERIFY_FAILED");
        assert_eq!(Error::Other("?".into()).code(), "UNKNOWN");
    }
}
