//! Classification of socket errors seen by the background loops
//!
//! Peers closing the connection and the poll timeouts used for cooperative
//! shutdown are part of normal operation and must not be reported as failures.

use std::io::{self, ErrorKind};

/// Checks if the error is a read/accept poll expiring
pub(crate) fn is_timeout_error(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Checks if the error is the peer going away
pub(crate) fn is_disconnect_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof | ErrorKind::NotConnected
    )
}

/// Checks if the call was interrupted by a signal and should simply be retried
pub(crate) fn is_interrupted(error: &io::Error) -> bool {
    error.kind() == ErrorKind::Interrupted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(kind: ErrorKind) -> io::Error {
        io::Error::new(kind, format!("simulated {kind:?}"))
    }

    #[test]
    fn test_timeouts() {
        assert!(is_timeout_error(&error(ErrorKind::WouldBlock)));
        assert!(is_timeout_error(&error(ErrorKind::TimedOut)));
        assert!(!is_timeout_error(&error(ErrorKind::ConnectionReset)));
    }

    #[test]
    fn test_disconnects() {
        for kind in [
            ErrorKind::ConnectionReset,
            ErrorKind::ConnectionAborted,
            ErrorKind::BrokenPipe,
            ErrorKind::UnexpectedEof,
            ErrorKind::NotConnected,
        ] {
            assert!(is_disconnect_error(&error(kind)), "{kind:?} should be a disconnect");
        }
        assert!(!is_disconnect_error(&error(ErrorKind::PermissionDenied)));
        assert!(!is_disconnect_error(&error(ErrorKind::WouldBlock)));
    }

    #[test]
    fn test_interrupted() {
        assert!(is_interrupted(&error(ErrorKind::Interrupted)));
        assert!(!is_interrupted(&error(ErrorKind::TimedOut)));
    }
}
