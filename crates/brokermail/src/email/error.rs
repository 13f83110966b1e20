//! Mailbox error types.

use thiserror::Error;

/// Errors that can occur while talking to the mailbox.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to connect to the IMAP server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Credentials not found: {0}")]
    CredentialsNotFound(String),

    /// The session is gone; the caller must reconnect.
    #[error("Not connected to the mailbox")]
    NotConnected,

    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// One message could not be fetched or parsed.
    #[error("Failed to read message UID {uid}: {reason}")]
    MessageError { uid: u32, reason: String },

    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    #[error("Invalid mailbox configuration: {0}")]
    ConfigError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl EmailError {
    /// True for failures that leave the cycle without a usable session.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, EmailError::MessageError { .. })
    }
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

impl From<crate::secrets::SecretError> for EmailError {
    fn from(err: crate::secrets::SecretError) -> Self {
        EmailError::CredentialsNotFound(err.to_string())
    }
}

/// Result type for mailbox operations.
pub type Result<T> = std::result::Result<T, EmailError>;
