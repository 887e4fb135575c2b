//! Error types for the integration crate.
//!
//! Protocol clients return `Report<ConnectorError>` so callers can layer
//! their own context on top:
//! - `ConnectorError`: a platform call or connection failed

use std::fmt;

/// Errors from platform protocol clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Connection to the service failed.
    ConnectionFailed { reason: String },
    /// The service rejected the supplied credentials.
    AuthenticationFailed { reason: String },
    /// The credentials are valid but lack access to the resource.
    AccessDenied { resource: String },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// The service answered with an unexpected status.
    UnexpectedStatus { status: u16, body: String },
    /// The service answered with something we could not interpret.
    ProtocolError { reason: String },
    /// Retries were exhausted.
    RetriesExhausted { attempts: u32, last_error: String },
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "connection failed: {reason}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "authentication failed: {reason}")
            }
            Self::AccessDenied { resource } => {
                write!(f, "access denied to {resource}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::UnexpectedStatus { status, body } => {
                write!(f, "unexpected status {status}: {body}")
            }
            Self::ProtocolError { reason } => {
                write!(f, "protocol error: {reason}")
            }
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => {
                write!(f, "gave up after {attempts} attempts: {last_error}")
            }
        }
    }
}

impl std::error::Error for ConnectorError {}

impl ConnectorError {
    /// Returns true for failures caused by the caller's credentials.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::AccessDenied { .. }
        )
    }

    pub(crate) fn connection(e: impl fmt::Display) -> Self {
        Self::ConnectionFailed {
            reason: e.to_string(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolError {
            reason: reason.into(),
        }
    }
}
