//! agent-link
//!
//! Client side of the link to an optional remote agent process:
//!
//! - `ipc` - connection handle, framing, wire frames and the socket transport
//! - `correlator` - single-settlement calls over a connection
//! - `availability` - per-client agent availability state machine
//! - `client` - `AgentClient`, owner of the connection and the tracker
//! - `api` - typed agent calls (drivers, topology, queries, ...)
//! - `config` - environment-driven client settings
//!
//! # Example
//!
//! ```ignore
//! use agent_link::{AgentClient, ClientConfig};
//!
//! let client = AgentClient::new(ClientConfig::from_env());
//! client.activate().await?;
//! let drivers = client.drivers().await?;
//! ```

pub mod api;
pub mod availability;
pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ipc;
pub mod models;

pub use availability::{should_prompt, Availability, AvailabilitySnapshot, AvailabilityTracker};
pub use client::AgentClient;
pub use config::ClientConfig;
pub use error::ClientError;
