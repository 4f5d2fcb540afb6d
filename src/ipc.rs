//! Connection plumbing between the client and the agent process.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐         Unix Socket          ┌─────────────────────┐
//! │   AgentClient   │  ◄──────────────────────────►│        agent        │
//! │  (Connection)   │    JSON frames + framing     │                     │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! Messages use HTTP-style Content-Length framing (same as LSP):
//!
//! ```text
//! Content-Length: 56\r\n
//! \r\n
//! {"type":"call","id":1,"event":"node:topology","args":[]}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use agent_link::ipc::transport;
//!
//! let connection = transport::connect(&socket_path).await?;
//! connection.send("schemaImport:drivers", vec![], Box::new(|err, result| { /* ... */ }));
//! ```

pub mod connection;
pub mod framing;
pub mod protocol;
pub mod transport;

pub use connection::{
    Completion, Connection, Delivery, ListenerId, Outbound, Outlet, Signal, SignalKind,
};
pub use framing::{read_message, write_message};
pub use protocol::Frame;
