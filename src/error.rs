//! Error taxonomy for agent calls.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`AgentClient`](crate::client::AgentClient) calls.
///
/// Every failed call resolves to exactly one of these. None of them are
/// retried by the client; a caller that wants to retry should go back
/// through `wait_available()` first.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection is currently held.
    #[error("Not connected to agent")]
    NotConnected,

    /// The connection dropped while the call was in flight.
    #[error("Connection to agent closed")]
    ConnectionClosed,

    /// The agent reported a failure. The payload is forwarded verbatim.
    #[error("Agent error: {0}")]
    Remote(serde_json::Value),

    /// The agent was reported unavailable while waiting for it.
    #[error("Agent unavailable")]
    Unavailable,

    /// Opt-in call timeout elapsed.
    #[error("Call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Failed to open the agent socket.
    #[error("Connection failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Protocol-level error (framing, encoding).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl ClientError {
    /// Whether the failure came from the connection going away rather than
    /// from the agent or the caller.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::NotConnected | ClientError::ConnectionClosed)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                ClientError::ConnectFailed(err)
            }
            _ => ClientError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_display() {
        assert_eq!(ClientError::NotConnected.to_string(), "Not connected to agent");
        assert_eq!(
            ClientError::Timeout(Duration::from_secs(30)).to_string(),
            "Call timed out after 30s"
        );

        let remote = ClientError::Remote(serde_json::json!("Failed to load driver"));
        assert_eq!(remote.to_string(), "Agent error: \"Failed to load driver\"");

        let protocol_err = ClientError::Protocol("Invalid JSON".to_string());
        assert_eq!(protocol_err.to_string(), "Protocol error: Invalid JSON");
    }

    #[test]
    fn test_client_error_from_io() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: ClientError = not_found.into();
        assert!(matches!(err, ClientError::ConnectFailed(_)));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ClientError = refused.into();
        assert!(matches!(err, ClientError::ConnectFailed(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "other");
        let err: ClientError = other.into();
        assert!(matches!(err, ClientError::Io(_)));
    }

    #[test]
    fn test_is_disconnect() {
        assert!(ClientError::NotConnected.is_disconnect());
        assert!(ClientError::ConnectionClosed.is_disconnect());
        assert!(!ClientError::Unavailable.is_disconnect());
        assert!(!ClientError::Remote(serde_json::Value::Null).is_disconnect());
    }
}
