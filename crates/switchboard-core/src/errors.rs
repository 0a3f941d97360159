use std::time::Duration;

/// Error taxonomy for the engine-side session socket.
///
/// Transient connection failures trigger the reconnect policy; protocol
/// errors drop the offending event and leave the connection open; a clean
/// close never reconnects.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConnectionError {
    // Transient — reconnect with backoff
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    // Non-transient
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed (clean: {clean})")]
    Closed { clean: bool },
    #[error("reconnect attempts exhausted after {attempts}")]
    ReconnectExhausted { attempts: u32 },
}

impl ConnectionError {
    /// Whether the reconnect policy should be consulted.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectFailed(_) | Self::ConnectionLost(_) | Self::HandshakeTimeout(_) => true,
            Self::Closed { clean } => !clean,
            Self::Protocol(_) | Self::NotConnected | Self::ReconnectExhausted { .. } => false,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::ConnectionLost(_) => "connection_lost",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::Protocol(_) => "protocol",
            Self::NotConnected => "not_connected",
            Self::Closed { .. } => "closed",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ConnectionError::ConnectFailed("refused".into()).is_retryable());
        assert!(ConnectionError::ConnectionLost("reset".into()).is_retryable());
        assert!(ConnectionError::HandshakeTimeout(Duration::from_secs(10)).is_retryable());
        assert!(ConnectionError::Closed { clean: false }.is_retryable());
    }

    #[test]
    fn non_retryable_classification() {
        assert!(!ConnectionError::Protocol("bad frame".into()).is_retryable());
        assert!(!ConnectionError::NotConnected.is_retryable());
        assert!(!ConnectionError::Closed { clean: true }.is_retryable());
        assert!(!ConnectionError::ReconnectExhausted { attempts: 5 }.is_retryable());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ConnectionError::NotConnected.error_kind(), "not_connected");
        assert_eq!(
            ConnectionError::Closed { clean: true }.error_kind(),
            "closed"
        );
        assert_eq!(
            ConnectionError::ReconnectExhausted { attempts: 5 }.error_kind(),
            "reconnect_exhausted"
        );
    }

    #[test]
    fn closed_display_distinguishes_clean() {
        let clean = ConnectionError::Closed { clean: true }.to_string();
        let unclean = ConnectionError::Closed { clean: false }.to_string();
        assert!(clean.contains("true"));
        assert!(unclean.contains("false"));
    }
}
