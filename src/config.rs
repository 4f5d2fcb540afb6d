//! Client configuration.
//!
//! Values come from the environment and may be overridden by CLI flags:
//!
//! | Variable                        | Meaning                                   |
//! |---------------------------------|-------------------------------------------|
//! | `AGENT_LINK_SOCKET`             | Agent socket path                         |
//! | `AGENT_LINK_CALL_TIMEOUT_SECS`  | Per-call timeout in seconds (unset/0: none) |

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Environment variable naming the agent socket.
pub const SOCKET_ENV: &str = "AGENT_LINK_SOCKET";

/// Environment variable holding the opt-in call timeout.
pub const CALL_TIMEOUT_ENV: &str = "AGENT_LINK_CALL_TIMEOUT_SECS";

const SOCKET_FILE_NAME: &str = "agent-link.sock";

/// Resolve the default socket path for the agent.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/agent-link.sock` (Linux standard)
/// 2. `~/Library/Caches/agent-link.sock` (macOS)
/// 3. `/tmp/agent-link.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(SOCKET_FILE_NAME);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join(SOCKET_FILE_NAME);
    }

    PathBuf::from("/tmp").join(SOCKET_FILE_NAME)
}

/// Settings for an [`AgentClient`](crate::client::AgentClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    /// Upper bound on a single call. `None` lets calls pend until they are
    /// answered or the connection drops.
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            call_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(SOCKET_ENV).filter(|p| !p.trim().is_empty()) {
            config.socket_path = PathBuf::from(path);
        }

        if let Some(raw) = lookup(CALL_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.call_timeout = None,
                Ok(secs) => config.call_timeout = Some(Duration::from_secs(secs)),
                Err(_) => warn!("Ignoring invalid {}={}", CALL_TIMEOUT_ENV, raw),
            }
        }

        config
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_socket_path_format() {
        let path = default_socket_path();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(SOCKET_FILE_NAME)
        );
    }

    #[test]
    fn test_from_vars_empty_is_default() {
        let config = ClientConfig::from_vars(vars(&[]));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.call_timeout, None);
    }

    #[test]
    fn test_from_vars_reads_socket_and_timeout() {
        let config = ClientConfig::from_vars(vars(&[
            (SOCKET_ENV, "/run/agent.sock"),
            (CALL_TIMEOUT_ENV, "45"),
        ]));
        assert_eq!(config.socket_path, PathBuf::from("/run/agent.sock"));
        assert_eq!(config.call_timeout, Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_zero_or_invalid_timeout_means_none() {
        let zero = ClientConfig::from_vars(vars(&[(CALL_TIMEOUT_ENV, "0")]));
        assert_eq!(zero.call_timeout, None);

        let junk = ClientConfig::from_vars(vars(&[(CALL_TIMEOUT_ENV, "soon")]));
        assert_eq!(junk.call_timeout, None);
    }

    #[test]
    fn test_builders_override() {
        let config = ClientConfig::default()
            .with_socket_path("/tmp/other.sock")
            .with_call_timeout(Some(Duration::from_secs(5)));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/other.sock"));
        assert_eq!(config.call_timeout, Some(Duration::from_secs(5)));
    }
}
