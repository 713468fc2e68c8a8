//! Error types for host probing and batch runs.
//!
//! Two families live here. [`ProbeError`] describes why a single phase of a
//! single host probe failed; it is captured into the host's result and never
//! aborts a run. [`SiteCheckError`] covers the fatal conditions (input that
//! cannot be read, output that conflicts with the write policy) that stop the
//! process before or during a run.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Reason a probe phase failed for one host.
#[derive(Debug)]
pub enum ProbeError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to the target address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// HTTP request failed for a reason other than a timeout
    Http {
        /// The requested URL
        url: String,
        /// Full cause chain of the client error
        details: String,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// Peer certificate missing or unreadable
    CertificateError {
        /// Description of what went wrong
        reason: String,
    },

    /// Network operation timeout
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, source } => {
                write!(f, "Failed to resolve hostname {}: {}", hostname, source)
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "Connection failed to {}: {}", address, source)
            }
            Self::Http { url, details } => {
                write!(f, "HTTP request to {} failed: {}", url, details)
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::CertificateError { reason } => {
                write!(f, "Certificate error: {}", reason)
            }
            Self::Timeout { operation } => {
                write!(f, "Operation timed out: {}", operation)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<openssl::error::ErrorStack> for ProbeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S: fmt::Debug> From<openssl::ssl::HandshakeError<S>> for ProbeError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        match e {
            // Blocking sockets only report WouldBlock when a read/write timeout fires.
            openssl::ssl::HandshakeError::WouldBlock(_) => Self::Timeout {
                operation: "TLS handshake".to_string(),
            },
            other => Self::HandshakeFailed {
                details: format!("{}", other),
            },
        }
    }
}

/// Fatal error that stops a run.
#[derive(Debug)]
pub enum SiteCheckError {
    /// The input file does not exist
    InputNotFound {
        /// Path that was requested
        path: PathBuf,
    },

    /// The input file exists but could not be read or decoded
    InputUnreadable {
        /// Path that was requested
        path: PathBuf,
        /// Underlying cause
        details: String,
    },

    /// Input content is structurally unusable, or a single value is invalid
    InvalidInput {
        /// Which field/parameter was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },

    /// The output file exists and neither overwrite nor append was requested
    OutputExists {
        /// Conflicting destination
        path: PathBuf,
    },

    /// The output destination could not be opened or written
    OutputUnwritable {
        /// Destination, `None` for the console
        path: Option<PathBuf>,
        /// Underlying cause
        details: String,
    },

    /// Configuration could not be loaded or is invalid
    Config {
        /// Description of the problem
        details: String,
    },
}

impl fmt::Display for SiteCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputNotFound { path } => {
                write!(f, "Input file {} not found.", path.display())
            }
            Self::InputUnreadable { path, details } => {
                write!(f, "Input file {} could not be read: {}", path.display(), details)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "Invalid input for '{}': {}", field, reason)
            }
            Self::OutputExists { path } => {
                write!(
                    f,
                    "Output file {} already exists. Use --overwrite or --append.",
                    path.display()
                )
            }
            Self::OutputUnwritable { path: Some(path), details } => {
                write!(f, "Output file {} is not writable: {}", path.display(), details)
            }
            Self::OutputUnwritable { path: None, details } => {
                write!(f, "Console output failed: {}", details)
            }
            Self::Config { details } => {
                write!(f, "Configuration error: {}", details)
            }
        }
    }
}

impl std::error::Error for SiteCheckError {}

impl From<crate::config::ConfigError> for SiteCheckError {
    fn from(e: crate::config::ConfigError) -> Self {
        Self::Config {
            details: e.to_string(),
        }
    }
}

/// Renders an error together with every `source()` below it, `a: b: c`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        current = cause.source();
    }
    message
}
