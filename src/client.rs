//! Agent client: one connection slot, one availability tracker.
//!
//! `AgentClient` is the owner of the logical connection. It wires each
//! attached connection's signals into its [`AvailabilityTracker`], runs calls
//! through the correlator, and applies the optional call timeout.
//!
//! # Connection Lifecycle
//!
//! - `activate()` - open the configured socket and attach it
//! - `attach()` - install a connection, disposing the previous one
//! - `detach()` - dispose the current connection (pending calls fail)
//!
//! Reconnecting is the owner's job: call `activate()` again.
//!
//! # Example
//!
//! ```ignore
//! use agent_link::{AgentClient, ClientConfig};
//!
//! let client = AgentClient::new(ClientConfig::from_env());
//! client.activate().await?;
//! client.wait_available().await?;
//! let nodes = client.topology(false, false).await?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, warn};

use crate::availability::{Availability, AvailabilityTracker};
use crate::config::ClientConfig;
use crate::correlator;
use crate::error::ClientError;
use crate::ipc::{transport, Connection, Signal, SignalKind};

/// Client for an optional remote agent process.
#[derive(Debug)]
pub struct AgentClient {
    config: ClientConfig,
    connection: Mutex<Option<Arc<Connection>>>,
    tracker: Arc<AvailabilityTracker>,
}

impl AgentClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            tracker: Arc::new(AvailabilityTracker::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tracker(&self) -> &AvailabilityTracker {
        &self.tracker
    }

    pub fn availability(&self) -> Availability {
        self.tracker.state()
    }

    /// Whether a live connection is held.
    pub fn is_connected(&self) -> bool {
        self.slot().as_ref().is_some_and(|c| c.is_open())
    }

    /// Open the configured socket and attach a fresh connection to it.
    ///
    /// A failed connect is reported to the tracker as `link-failed`.
    pub async fn activate(&self) -> Result<(), ClientError> {
        let stream = match transport::open(&self.config.socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Agent connect failed: {}", e);
                self.tracker.handle_signal(&Signal::LinkFailed);
                return Err(e);
            }
        };

        let (connection, outbound) = Connection::new();
        self.attach(Arc::clone(&connection));
        transport::serve(stream, &connection, outbound);
        Ok(())
    }

    /// Install `connection` as the current connection.
    ///
    /// The previous connection, if any, is disposed first, which fails its
    /// pending calls with `ConnectionClosed`.
    pub fn attach(&self, connection: Arc<Connection>) {
        self.detach();

        for kind in [
            SignalKind::LinkFailed,
            SignalKind::PeerCount,
            SignalKind::LinkClosed,
        ] {
            let tracker = Arc::clone(&self.tracker);
            connection.on(kind, move |signal| tracker.handle_signal(signal));
        }

        debug!("Agent connection attached");
        *self.slot() = Some(connection);
    }

    /// Dispose the current connection, if any.
    pub fn detach(&self) {
        let previous = self.slot().take();
        if let Some(previous) = previous {
            debug!("Detaching agent connection");
            previous.dispose();
        }
    }

    /// Issue a call on the current connection.
    ///
    /// Fails immediately with `NotConnected` when nothing is attached. Does
    /// not consult availability; see [`call_when_available`](Self::call_when_available).
    pub async fn call(&self, event: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        let connection = self.slot().clone();
        let pending = correlator::start(connection.as_ref(), event, args)?;
        drop(connection);

        match self.config.call_timeout {
            None => pending.await,
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Call {} timed out after {:?}", event, limit);
                    Err(ClientError::Timeout(limit))
                }
            },
        }
    }

    /// Wait for the agent to become available. See
    /// [`AvailabilityTracker::wait_available`].
    pub async fn wait_available(&self) -> Result<(), ClientError> {
        self.tracker.wait_available().await
    }

    /// Wait for availability, then issue the call.
    ///
    /// A call made while the agent is unavailable fails with `Unavailable`
    /// on the next negative broadcast instead of `NotConnected`.
    pub async fn call_when_available(
        &self,
        event: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        self.wait_available().await?;
        self.call(event, args).await
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.connection.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AgentClient {
    fn drop(&mut self) {
        self.detach();
    }
}
