//! JSON frames exchanged with the agent.
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! ```text
//! client -> agent  {"type":"call","id":7,"event":"node:topology","args":[false,true]}
//! agent -> client  {"type":"reply","id":7,"error":null,"result":{...}}
//! agent -> client  {"type":"peer_count","count":2}
//! agent -> client  {"type":"link_closed"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// One frame on the agent socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Outbound call. `id` correlates the reply.
    Call {
        id: u64,
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Completion of an earlier call.
    Reply {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// Number of agent peers currently reachable.
    PeerCount { count: u64 },
    /// The agent side is going away.
    LinkClosed,
}

impl Frame {
    /// Build a successful reply frame.
    pub fn ok(id: u64, result: Value) -> Self {
        Frame::Reply {
            id,
            error: None,
            result: Some(result),
        }
    }

    /// Build a failed reply frame.
    pub fn err(id: u64, error: Value) -> Self {
        Frame::Reply {
            id,
            error: Some(error),
            result: None,
        }
    }

    pub fn encode(&self) -> Result<String, ClientError> {
        serde_json::to_string(self)
            .map_err(|e| ClientError::Protocol(format!("Failed to serialize frame: {}", e)))
    }

    pub fn decode(raw: &str) -> Result<Self, ClientError> {
        serde_json::from_str(raw)
            .map_err(|e| ClientError::Protocol(format!("Failed to parse frame: {}", e)))
    }
}
