//! Error types for the IMAP engine.

use thiserror::Error;

/// Protocol-level failures.
///
/// Any of these means the current command cannot complete and the
/// connection should be considered poisoned: the caller must reopen it
/// before issuing further commands.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A response line exceeded the maximum allowed length.
    #[error("response line too long")]
    LineTooLong,

    /// A literal marker was syntactically invalid or oversized.
    #[error("bad literal: {0}")]
    BadLiteral(String),

    /// A literal's declared byte count did not match what was read.
    #[error("literal count mismatch: declared {declared}, got {got}")]
    LiteralMismatch {
        /// Byte count declared in the `{N}` marker.
        declared: usize,
        /// Bytes actually consumed.
        got: usize,
    },

    /// A tagged completion arrived for a tag we did not issue.
    #[error("unmatched tag: expected {expected}, got {got}")]
    UnmatchedTag {
        /// Tag of the command in flight.
        expected: String,
        /// Tag the server answered with.
        got: String,
    },

    /// An unrecognized field inside a FETCH data list.
    ///
    /// Skipping unknown fields silently would desynchronize the byte
    /// offsets used for literal extraction, so this is a hard error.
    #[error("unexpected FETCH field: {0}")]
    UnexpectedField(String),

    /// A response line that does not match the IMAP grammar.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors that can occur during IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or encryption error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Protocol violation; the connection is assumed poisoned.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The transport was severed while a command was in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    /// An authentication mechanism was attempted and rejected.
    ///
    /// Non-fatal to the connection: the caller may re-prompt for
    /// credentials and try again on the same session.
    #[error("{mechanism} authentication failed: {message}")]
    AuthFailed {
        /// Mechanism name as sent on the wire.
        mechanism: String,
        /// Server-supplied or mechanism-supplied failure text.
        message: String,
    },

    /// No authentication mechanism could be attempted at all.
    #[error("no usable authentication mechanism")]
    AuthUnavailable,

    /// The user cancelled a credential prompt.
    #[error("cancelled by user")]
    Cancelled,

    /// Server answered a command with `NO` or `BAD`.
    ///
    /// Carries the server's literal message for display; never poisons
    /// the connection by itself.
    #[error("server rejected command: {0}")]
    Rejected(String),
}

impl Error {
    /// Reclassifies transport-level I/O failures as a lost connection.
    ///
    /// Used by the command drive loop: once a command is in flight, any
    /// read/write failure means the exchange can never complete.
    #[must_use]
    pub fn into_lost(self) -> Self {
        match self {
            Self::Io(e) => Self::ConnectionLost(e),
            other => other,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_io_becomes_connection_lost() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "closed",
        ));
        assert!(matches!(err.into_lost(), Error::ConnectionLost(_)));
    }

    #[test]
    fn test_non_io_unchanged_by_into_lost() {
        let err = Error::Rejected("NO such mailbox".to_string());
        assert!(matches!(err.into_lost(), Error::Rejected(_)));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = Error::Protocol(ProtocolError::LiteralMismatch {
            declared: 10,
            got: 7,
        });
        assert!(err.to_string().contains("declared 10"));
    }
}
