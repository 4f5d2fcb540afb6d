//! Socket transport behind a [`Connection`].
//!
//! Two tasks serve each connection:
//!
//! - the writer drains the connection's outlet, parks each completion under
//!   its call id and writes a `call` frame. Abandoned calls have their
//!   completion released right away;
//! - the reader routes `reply` frames to the parked completion with the
//!   same id and turns `peer_count` / `link_closed` frames into signals.
//!
//! Replies are matched by id only, so the agent may answer in any order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::UnixStream;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::connection::{Completion, Connection, Delivery, Outbound, Outlet, Signal};
use super::framing::{read_message, write_message};
use super::protocol::Frame;
use crate::error::ClientError;

type Inflight = Arc<Mutex<HashMap<u64, Completion>>>;

fn lock(inflight: &Inflight) -> MutexGuard<'_, HashMap<u64, Completion>> {
    inflight.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connect to the agent socket and start serving a new [`Connection`].
///
/// # Errors
///
/// Returns `ClientError::ConnectFailed` if the socket does not exist or the
/// agent refuses the connection.
pub async fn connect(socket_path: &Path) -> Result<Arc<Connection>, ClientError> {
    Ok(spawn(open(socket_path).await?))
}

/// Open the agent socket without starting a connection on it.
pub async fn open(socket_path: &Path) -> Result<UnixStream, ClientError> {
    let stream = UnixStream::connect(socket_path).await?;
    info!("Connected to agent at {}", socket_path.display());
    Ok(stream)
}

/// Create a [`Connection`] and serve it over an already-open stream.
///
/// Must be called from within a tokio runtime.
pub fn spawn<S>(stream: S) -> Arc<Connection>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (connection, outbound) = Connection::new();
    serve(stream, &connection, outbound);
    connection
}

/// Start the reader and writer tasks for `connection`.
///
/// Split from [`spawn`] so listeners can be registered before the first
/// inbound frame is read.
pub fn serve<S>(stream: S, connection: &Arc<Connection>, outlet: Outlet)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let inflight: Inflight = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(write_loop(
        write_half,
        outlet,
        Arc::clone(&inflight),
        Arc::downgrade(connection),
    ));
    tokio::spawn(read_loop(
        BufReader::new(read_half),
        Arc::downgrade(connection),
        inflight,
    ));
}

async fn write_loop<W>(
    mut writer: W,
    mut outlet: Outlet,
    inflight: Inflight,
    connection: Weak<Connection>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(delivery) = outlet.next().await {
        let Outbound {
            id,
            event,
            args,
            completion,
        } = match delivery {
            Delivery::Call(outbound) => outbound,
            Delivery::Abandoned(id) => {
                if lock(&inflight).remove(&id).is_some() {
                    debug!(id, "Released completion of abandoned call");
                }
                continue;
            }
        };

        let frame = Frame::Call {
            id,
            event: event.clone(),
            args,
        };
        let body = match frame.encode() {
            Ok(body) => body,
            Err(e) => {
                warn!("Dropping call {} ({}): {}", id, event, e);
                refuse(completion, &e);
                continue;
            }
        };

        // Park before writing so the reply can never outrun its completion
        lock(&inflight).insert(id, completion);

        if let Err(e) = write_message(&mut writer, &body).await {
            warn!("Failed to send {} to agent: {:#}", event, e);
            lock(&inflight).remove(&id);
            if let Some(connection) = connection.upgrade() {
                connection.emit(Signal::LinkFailed);
                connection.dispose();
            }
            break;
        }

        debug!(id, event = %event, "Call sent");
    }
}

/// Settle a call that never reached the wire with `error` as its remote error.
fn refuse(completion: Completion, error: &ClientError) {
    completion(Some(Value::String(error.to_string())), None);
}

async fn read_loop<R>(mut reader: R, connection: Weak<Connection>, inflight: Inflight)
where
    R: AsyncBufRead + Unpin,
{
    let failed = loop {
        let raw = match read_message(&mut reader).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Agent closed the connection");
                break false;
            }
            Err(e) => {
                warn!("Agent link failed: {:#}", e);
                break true;
            }
        };

        let frame = match Frame::decode(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Agent link failed: {}", e);
                break true;
            }
        };

        let signal = match frame {
            Frame::Reply { id, error, result } => {
                let completion = lock(&inflight).remove(&id);
                match completion {
                    Some(completion) => completion(error, result),
                    None => warn!(id, "Reply for unknown or abandoned call, ignoring"),
                }
                continue;
            }
            Frame::PeerCount { count } => Signal::PeerCount(count),
            Frame::LinkClosed => {
                debug!("Agent announced link close");
                break false;
            }
            Frame::Call { id, event, .. } => {
                warn!(id, event = %event, "Unexpected call frame from agent, ignoring");
                continue;
            }
        };

        match connection.upgrade() {
            Some(connection) => connection.emit(signal),
            None => return,
        }
    };

    if let Some(connection) = connection.upgrade() {
        if failed {
            connection.emit(Signal::LinkFailed);
        }
        connection.dispose();
    }

    let orphaned: Vec<Completion> = lock(&inflight).drain().map(|(_, c)| c).collect();
    if !orphaned.is_empty() {
        debug!(count = orphaned.len(), "Dropping completions of unanswered calls");
    }
}
