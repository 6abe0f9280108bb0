use std::fmt;

/// Failures surfaced by [MockServer::verify](crate::MockServer::verify) and by server construction.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    // Errors from the socket layer
    Io(std::io::Error),

    // A received byte differed from the scripted one
    Mismatch { offset: usize, expected: u8, actual: u8 },

    // Structural problems found while verifying
    UnexpectedBytes(Vec<u8>),
    UnfinishedExpectation(Vec<u8>),
    PendingActions(usize),
}

/// Coarse classification of an [Error].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Received bytes did not match the expected script.
    Match,
    /// The connection failed while reading or writing.
    Io,
    /// The exchange ended with unconsumed data or script.
    Verification,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_) => ErrorCategory::Io,
            Error::Mismatch { .. } => ErrorCategory::Match,
            Error::UnexpectedBytes(_) | Error::UnfinishedExpectation(_) | Error::PendingActions(_) => ErrorCategory::Verification,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(ref err) => err.fmt(f),

            Error::Mismatch { offset, expected, actual } => write!(
                f,
                "mismatch at offset {offset}: expected b'{}', received b'{}'",
                expected.escape_ascii(),
                actual.escape_ascii()
            ),
            Error::UnexpectedBytes(bytes) => write!(f, "received {} unexpected byte(s): b\"{}\"", bytes.len(), bytes.escape_ascii()),
            Error::UnfinishedExpectation(bytes) => write!(f, "expected {} more byte(s): b\"{}\"", bytes.len(), bytes.escape_ascii()),
            Error::PendingActions(count) => write!(f, "{count} scripted action(s) were never consumed"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
