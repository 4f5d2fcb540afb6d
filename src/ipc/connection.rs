//! Connection handle: one logical channel to the agent.
//!
//! A [`Connection`] has two faces. Callers use [`send`](Connection::send) to
//! queue outbound calls and [`on`](Connection::on) / [`once`](Connection::once)
//! / [`off`](Connection::off) to follow inbound signals. The transport owns the
//! [`Outlet`] returned by [`Connection::new`] and feeds inbound signals back
//! through [`emit`](Connection::emit).
//!
//! A connection is never patched in place. Reconnecting means building a new
//! `Connection` and disposing the old one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Trailing completion callback of a call: `(error, result)`.
///
/// The agent invokes it at most once. A null error counts as no error.
pub type Completion = Box<dyn FnOnce(Option<Value>, Option<Value>) + Send>;

type Handler = Arc<dyn Fn(&Signal) + Send + Sync>;

/// Inbound signal from the agent side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Low-level connect or read failure.
    LinkFailed,
    /// Number of reachable agent peers changed.
    PeerCount(u64),
    /// The connection went away.
    LinkClosed,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::LinkFailed => SignalKind::LinkFailed,
            Signal::PeerCount(_) => SignalKind::PeerCount,
            Signal::LinkClosed => SignalKind::LinkClosed,
        }
    }
}

/// Signal name used for listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    LinkFailed,
    PeerCount,
    LinkClosed,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::LinkFailed => "link-failed",
            SignalKind::PeerCount => "peer-count",
            SignalKind::LinkClosed => "link-closed",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration handle returned by [`Connection::on`] and [`Connection::once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// An outbound call waiting for the transport.
pub struct Outbound {
    /// Call id, unique per connection and starting at 1.
    pub id: u64,
    pub event: String,
    pub args: Vec<Value>,
    pub completion: Completion,
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbound")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Outbound {
    /// Invoke the completion with a success value.
    pub fn resolve(self, result: Value) {
        (self.completion)(None, Some(result));
    }

    /// Invoke the completion with an error value.
    pub fn reject(self, error: Value) {
        (self.completion)(Some(error), None);
    }
}

/// What the transport pulls from an [`Outlet`].
#[derive(Debug)]
pub enum Delivery {
    /// A call to write to the agent.
    Call(Outbound),
    /// The caller of this call id stopped waiting; its completion can go.
    Abandoned(u64),
}

/// Transport side of a connection.
#[derive(Debug)]
pub struct Outlet {
    calls: mpsc::UnboundedReceiver<Outbound>,
    abandoned: mpsc::UnboundedReceiver<u64>,
}

impl Outlet {
    /// Next delivery, or `None` once the connection is disposed.
    ///
    /// Calls are preferred over abandonments, so a call is always seen
    /// before its own abandonment.
    pub async fn next(&mut self) -> Option<Delivery> {
        tokio::select! {
            biased;
            call = self.calls.recv() => call.map(Delivery::Call),
            Some(id) = self.abandoned.recv() => Some(Delivery::Abandoned(id)),
        }
    }

    /// Next queued call, skipping abandonments.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.calls.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Outbound, mpsc::error::TryRecvError> {
        self.calls.try_recv()
    }
}

struct Outbox {
    calls: mpsc::UnboundedSender<Outbound>,
    abandoned: mpsc::UnboundedSender<u64>,
}

struct Listener {
    kind: SignalKind,
    once: bool,
    handler: Handler,
}

/// One logical connection to the agent.
pub struct Connection {
    outbox: Mutex<Option<Outbox>>,
    // BTreeMap keeps dispatch in registration order
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_listener: AtomicU64,
    next_call: AtomicU64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("listeners", &self.lock_listeners().len())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Create a connection and the outlet the transport drains.
    pub fn new() -> (Arc<Self>, Outlet) {
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let (abandoned_tx, abandoned) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            outbox: Mutex::new(Some(Outbox {
                calls: calls_tx,
                abandoned: abandoned_tx,
            })),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(1),
            next_call: AtomicU64::new(1),
        });
        (connection, Outlet { calls, abandoned })
    }

    /// Queue a call and return its id. Delivery to the transport is FIFO
    /// per connection.
    ///
    /// A send that races disposal is dropped along with its completion.
    /// Pending calls learn about that through their `link-closed` listener.
    pub fn send(&self, event: &str, args: Vec<Value>, completion: Completion) -> u64 {
        let id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let outbound = Outbound {
            id,
            event: event.to_string(),
            args,
            completion,
        };

        let sender = self.lock_outbox().as_ref().map(|o| o.calls.clone());
        match sender {
            Some(tx) => {
                if let Err(mpsc::error::SendError(dropped)) = tx.send(outbound) {
                    debug!("Transport gone, dropping send of {}", dropped.event);
                }
            }
            None => debug!("Connection disposed, dropping send of {}", outbound.event),
        }
        id
    }

    /// Let the transport release the completion of call `id`.
    ///
    /// Used when the caller stops waiting before the agent answers. A no-op
    /// once the connection is disposed.
    pub fn abandon(&self, id: u64) {
        if let Some(outbox) = self.lock_outbox().as_ref() {
            let _ = outbox.abandoned.send(id);
        }
    }

    /// Whether the outbound side still accepts sends.
    pub fn is_open(&self) -> bool {
        self.lock_outbox()
            .as_ref()
            .is_some_and(|o| !o.calls.is_closed())
    }

    /// Subscribe to every signal of `kind`.
    pub fn on<F>(&self, kind: SignalKind, handler: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(handler))
    }

    /// Subscribe to the next signal of `kind` only. The listener is
    /// removed before the handler runs.
    pub fn once<F>(&self, kind: SignalKind, handler: F) -> ListenerId
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(handler))
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let removed = self.lock_listeners().remove(&id).is_some();
        if removed {
            trace!(?id, "Listener removed");
        }
        removed
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: SignalKind) -> usize {
        self.lock_listeners()
            .values()
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Deliver an inbound signal to its listeners.
    ///
    /// Handlers run after the registry lock is released, so they may call
    /// [`off`](Self::off) or register new listeners. Those new listeners do
    /// not see the signal being dispatched.
    pub fn emit(&self, signal: Signal) {
        let kind = signal.kind();
        let handlers: Vec<Handler> = {
            let mut listeners = self.lock_listeners();
            let ids: Vec<ListenerId> = listeners
                .iter()
                .filter(|(_, l)| l.kind == kind)
                .map(|(id, _)| *id)
                .collect();

            ids.into_iter()
                .filter_map(|id| {
                    if listeners.get(&id)?.once {
                        listeners.remove(&id).map(|l| l.handler)
                    } else {
                        listeners.get(&id).map(|l| Arc::clone(&l.handler))
                    }
                })
                .collect()
        };

        trace!(signal = %kind, listeners = handlers.len(), "Dispatching signal");
        for handler in handlers {
            handler(&signal);
        }
    }

    /// Tear the connection down.
    ///
    /// Current listeners receive a final `link-closed`, then every listener
    /// is dropped and the outbound queue is closed.
    pub fn dispose(&self) {
        let outbox = self.lock_outbox().take();
        if outbox.is_none() {
            return;
        }

        debug!("Disposing agent connection");
        self.emit(Signal::LinkClosed);
        self.lock_listeners().clear();
    }

    fn register(&self, kind: SignalKind, once: bool, handler: Handler) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().insert(id, Listener { kind, once, handler });
        id
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Option<Outbox>> {
        self.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, BTreeMap<ListenerId, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
