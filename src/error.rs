//! Domain-specific error types for nzbfetch
//!
//! This module provides structured error handling with proper error chains
//! and context preservation.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the nzbfetch application
#[derive(Error, Debug)]
pub enum NzbFetchError {
    #[error("NZB error: {0}")]
    Nzb(#[from] NzbError),

    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("yEnc decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NzbFetchError {
    /// True if this error (or the error it wraps) is a cooperative
    /// cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            NzbFetchError::Download(DownloadError::Cancelled) => true,
            NzbFetchError::Download(DownloadError::File { source, .. }) => source.is_cancelled(),
            _ => false,
        }
    }

    /// True if the error originated at the transport layer (connect,
    /// TLS, read, write, unexpected EOF) as opposed to the protocol or
    /// decode layers.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NzbFetchError::Nntp(
                NntpError::ConnectionFailed { .. }
                    | NntpError::Timeout { .. }
                    | NntpError::Tls(_)
                    | NntpError::UnexpectedEof
                    | NntpError::Io(_)
            )
        ) || matches!(self, NzbFetchError::Decode(DecodeError::Io(_)))
    }
}

/// NZB parsing and validation errors
#[derive(Error, Debug)]
pub enum NzbError {
    #[error("Failed to parse NZB file: {0}")]
    ParseError(String),

    #[error("NZB file not found: {0}")]
    NotFound(PathBuf),

    #[error("No files found in NZB")]
    EmptyNzb,
}

/// NNTP protocol and connection errors
#[derive(Error, Debug)]
pub enum NntpError {
    #[error("Connection failed to {server}:{port}: {source}")]
    ConnectionFailed {
        server: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("Connection timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Group not selectable: {group}: {response}")]
    GroupNotFound { group: String, response: String },

    #[error("Article not found: <{message_id}>: {response}")]
    ArticleNotFound {
        message_id: String,
        response: String,
    },

    #[error("Unexpected end of stream")]
    UnexpectedEof,

    #[error("Connection unhealthy")]
    UnhealthyConnection,

    #[error("Connection pool closed")]
    PoolClosed,

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// yEnc decoder errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed yEnc frame: {0}")]
    MalformedFrame(String),

    #[error("CRC mismatch: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("I/O error while decoding: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("No usable server configured")]
    NoServer,

    #[error("Invalid connection count: {count} (must be 1-100)")]
    InvalidConnections { count: u16 },
}

/// Download orchestration errors
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download of {name} failed")]
    File {
        name: String,
        #[source]
        source: Box<NzbFetchError>,
    },

    #[error("Segment task failed: {0}")]
    Task(String),

    #[error("Download cancelled")]
    Cancelled,
}

/// Result type alias using NzbFetchError
pub type Result<T> = std::result::Result<T, NzbFetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NzbError::NotFound(PathBuf::from("/test/file.nzb"));
        assert_eq!(err.to_string(), "NZB file not found: /test/file.nzb");
    }

    #[test]
    fn test_error_conversion() {
        let nzb_err = NzbError::EmptyNzb;
        let err: NzbFetchError = nzb_err.into();
        assert!(matches!(err, NzbFetchError::Nzb(_)));
    }

    #[test]
    fn test_cancelled_seen_through_file_wrapper() {
        let inner: NzbFetchError = DownloadError::Cancelled.into();
        let err: NzbFetchError = DownloadError::File {
            name: "a.bin".to_string(),
            source: Box::new(inner),
        }
        .into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_transport_classification() {
        let err: NzbFetchError = NntpError::UnexpectedEof.into();
        assert!(err.is_transport());

        let err: NzbFetchError = NntpError::Protocol("bad greeting".into()).into();
        assert!(!err.is_transport());
    }
}
