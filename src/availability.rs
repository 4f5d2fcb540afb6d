//! Agent availability tracking.
//!
//! The tracker follows connection signals and keeps a tri-state view of
//! whether an agent peer is reachable:
//!
//! ```text
//! Unknown ──peer-count>0──► Available ◄──peer-count>0── Unavailable
//!    │                          │                          ▲
//!    └──link-failed / peer-count=0 / link-closed───────────┘
//! ```
//!
//! Transitions are broadcast as booleans. `true` is sent on every edge into
//! `Available`; `false` is sent on every `peer-count(0)` and `link-closed`,
//! including repeats. `link-failed` only flips the state.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::ipc::Signal;

/// Broadcast buffer. A waiter only ever reads the first event.
const BROADCAST_CAPACITY: usize = 16;

/// Whether an agent peer is currently reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Unknown,
    Available,
    Unavailable,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Unknown => "unknown",
            Availability::Available => "available",
            Availability::Unavailable => "unavailable",
        }
    }
}

/// Point-in-time view of the tracker, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilitySnapshot {
    pub availability: Availability,
    /// Last reported peer count, if any was received.
    pub peers: Option<u64>,
    pub since: DateTime<Utc>,
}

/// Whether to surface an "agent not running" prompt to the user.
///
/// Pure function of the current availability and whether the caller asked
/// for the prompt.
pub fn should_prompt(availability: Availability, prompt_requested: bool) -> bool {
    prompt_requested && availability != Availability::Available
}

/// Per-client availability state machine.
#[derive(Debug)]
pub struct AvailabilityTracker {
    state: Mutex<AvailabilitySnapshot>,
    events: broadcast::Sender<bool>,
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Mutex::new(AvailabilitySnapshot {
                availability: Availability::Unknown,
                peers: None,
                since: Utc::now(),
            }),
            events,
        }
    }

    pub fn state(&self) -> Availability {
        self.lock().availability
    }

    pub fn snapshot(&self) -> AvailabilitySnapshot {
        self.lock().clone()
    }

    /// Presentation hint for the current state. See [`should_prompt`].
    pub fn presentation_hint(&self, prompt_requested: bool) -> bool {
        should_prompt(self.state(), prompt_requested)
    }

    /// Observe every broadcast transition.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.events.subscribe()
    }

    /// Number of live subscriptions, waiters included.
    pub fn waiter_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Feed one connection signal into the state machine.
    pub fn handle_signal(&self, signal: &Signal) {
        match *signal {
            Signal::LinkFailed => {
                let mut state = self.lock();
                Self::transition(&mut state, Availability::Unavailable);
            }
            Signal::PeerCount(count) if count > 0 => {
                let mut state = self.lock();
                state.peers = Some(count);
                if Self::transition(&mut state, Availability::Available) {
                    info!(peers = count, "Agent available");
                    // Sent under the lock so waiters cannot miss it
                    let _ = self.events.send(true);
                }
            }
            Signal::PeerCount(_) | Signal::LinkClosed => {
                let mut state = self.lock();
                if let Signal::PeerCount(count) = *signal {
                    state.peers = Some(count);
                }
                if Self::transition(&mut state, Availability::Unavailable) {
                    info!("Agent unavailable");
                }
                let _ = self.events.send(false);
            }
        }
    }

    /// Wait until an agent peer is reachable.
    ///
    /// Returns immediately when already available. Otherwise resolves on the
    /// next broadcast: `Ok(())` on `true`, `Err(Unavailable)` on `false`.
    /// Every call gets its own subscription.
    pub async fn wait_available(&self) -> Result<(), ClientError> {
        let mut rx = {
            let state = self.lock();
            if state.availability == Availability::Available {
                return Ok(());
            }
            self.events.subscribe()
        };

        debug!("Waiting for agent availability");
        match rx.recv().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ClientError::Unavailable),
            Err(broadcast::error::RecvError::Lagged(_)) => match self.state() {
                Availability::Available => Ok(()),
                _ => Err(ClientError::Unavailable),
            },
            Err(broadcast::error::RecvError::Closed) => Err(ClientError::Unavailable),
        }
    }

    /// Apply `next`; returns `true` if the state changed.
    fn transition(state: &mut AvailabilitySnapshot, next: Availability) -> bool {
        if state.availability == next {
            return false;
        }
        debug!(
            from = state.availability.as_str(),
            to = next.as_str(),
            "Availability transition"
        );
        state.availability = next;
        state.since = Utc::now();
        true
    }

    fn lock(&self) -> MutexGuard<'_, AvailabilitySnapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
