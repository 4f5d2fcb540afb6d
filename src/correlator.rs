//! Call correlation: one send, one settlement.
//!
//! [`start`] turns a send on a [`Connection`] into a [`PendingCall`] future.
//! Two paths race to settle it:
//!
//! - the completion callback passed along with the send, and
//! - a `once` listener on `link-closed` registered before the send.
//!
//! Both go through [`Settlement::settle`], which consumes a one-shot sender,
//! so whichever path arrives second is a no-op. The completion path also
//! removes the disconnect listener; removal is idempotent.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::ClientError;
use crate::ipc::{Connection, ListenerId, SignalKind};

type Outcome = Result<Value, ClientError>;

/// Outcome sink of one call. Settles at most once.
struct Settlement {
    sink: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Settlement {
    /// Deliver `outcome` unless the call was already settled.
    ///
    /// Returns `true` if this call performed the settlement.
    fn settle(&self, outcome: Outcome) -> bool {
        let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sink {
            Some(tx) => {
                // The caller may have stopped waiting; that still counts as settled.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Future for an in-flight call.
///
/// Resolves exactly once. Dropping it before resolution removes the
/// disconnect listener and abandons the call, so the transport releases its
/// completion. A later reply from the agent is ignored.
#[derive(Debug)]
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    event: String,
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    listener: ListenerId,
    connection: Weak<Connection>,
    settled: bool,
}

impl Future for PendingCall {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => outcome,
            // Sink dropped unsettled: the connection was torn down under us
            Poll::Ready(Err(_)) => Err(ClientError::ConnectionClosed),
            Poll::Pending => return Poll::Pending,
        };
        self.settled = true;
        Poll::Ready(outcome)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        connection.off(self.listener);
        if !self.settled {
            debug!("Call {} ({}) abandoned before it settled", self.event, self.id);
            connection.abandon(self.id);
        }
    }
}

/// Register a call and send it.
///
/// Fails synchronously with `NotConnected` when no connection is held, and
/// with `ConnectionClosed` when the held connection is already disposed.
pub fn start(
    connection: Option<&Arc<Connection>>,
    event: &str,
    args: Vec<Value>,
) -> Result<PendingCall, ClientError> {
    let connection = connection.ok_or(ClientError::NotConnected)?;

    let (tx, rx) = oneshot::channel();
    let settlement = Arc::new(Settlement {
        sink: Mutex::new(Some(tx)),
    });

    let listener = connection.once(SignalKind::LinkClosed, {
        let settlement = Arc::clone(&settlement);
        let event = event.to_string();
        move |_| {
            if settlement.settle(Err(ClientError::ConnectionClosed)) {
                debug!("Call {} failed: connection closed", event);
            }
        }
    });

    // Checked after registering so a concurrent dispose either sees the
    // listener or is seen here.
    if !connection.is_open() {
        connection.off(listener);
        return Err(ClientError::ConnectionClosed);
    }

    let completion = {
        let connection = Arc::downgrade(connection);
        let event = event.to_string();
        move |error: Option<Value>, result: Option<Value>| {
            if let Some(connection) = connection.upgrade() {
                connection.off(listener);
            }
            let outcome = match error {
                Some(error) if !error.is_null() => Err(ClientError::Remote(error)),
                _ => Ok(result.unwrap_or(Value::Null)),
            };
            if !settlement.settle(outcome) {
                trace!("Late completion for {} ignored", event);
            }
        }
    };

    trace!("Sending {}", event);
    let id = connection.send(event, args, Box::new(completion));

    Ok(PendingCall {
        event: event.to_string(),
        id,
        rx,
        listener,
        connection: Arc::downgrade(connection),
        settled: false,
    })
}

/// Send a call and wait for its outcome.
pub async fn call(
    connection: Option<&Arc<Connection>>,
    event: &str,
    args: Vec<Value>,
) -> Result<Value, ClientError> {
    start(connection, event, args)?.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::timeout;

    use crate::ipc::{Delivery, Outbound, Outlet, Signal};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn next_outbound(rx: &mut Outlet) -> Outbound {
        timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("Test timed out")
            .expect("Outbound queue closed")
    }

    #[test]
    fn test_no_connection_fails_synchronously() {
        let err = start(None, "schemaImport:drivers", vec![]).unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[test]
    fn test_disposed_connection_fails_synchronously() {
        let (connection, _rx) = Connection::new();
        connection.dispose();

        let err = start(Some(&connection), "node:topology", vec![]).unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert_eq!(connection.listener_count(SignalKind::LinkClosed), 0);
    }

    #[tokio::test]
    async fn test_completion_settles_and_removes_listener() {
        let (connection, mut rx) = Connection::new();

        let pending = start(Some(&connection), "node:topology", vec![json!(true)]).unwrap();
        assert_eq!(connection.listener_count(SignalKind::LinkClosed), 1);

        let outbound = next_outbound(&mut rx).await;
        assert_eq!(outbound.event, "node:topology");
        assert_eq!(outbound.args, vec![json!(true)]);
        outbound.resolve(json!([{"nodeId": "n1"}]));

        let result = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap();
        assert_eq!(result, json!([{"nodeId": "n1"}]));
        assert_eq!(connection.listener_count(SignalKind::LinkClosed), 0);

        // A disconnect after settlement touches nothing
        connection.emit(Signal::LinkClosed);
    }

    #[tokio::test]
    async fn test_remote_error_is_forwarded_verbatim() {
        let (connection, mut rx) = Connection::new();

        let pending = start(Some(&connection), "schemaImport:schemas", vec![]).unwrap();
        next_outbound(&mut rx)
            .await
            .reject(json!({"message": "Driver not found", "code": 17}));

        match timeout(TEST_TIMEOUT, pending).await.unwrap() {
            Err(ClientError::Remote(value)) => {
                assert_eq!(value, json!({"message": "Driver not found", "code": 17}))
            }
            other => panic!("Expected Remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_null_error_counts_as_success() {
        let (connection, mut rx) = Connection::new();

        let pending = start(Some(&connection), "node:query:close", vec![]).unwrap();
        let outbound = next_outbound(&mut rx).await;
        (outbound.completion)(Some(Value::Null), None);

        let result = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_disconnect_first_then_late_completion_is_noop() {
        let (connection, mut rx) = Connection::new();

        let pending = start(Some(&connection), "node:query", vec![]).unwrap();
        let outbound = next_outbound(&mut rx).await;

        connection.emit(Signal::LinkClosed);
        let err = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));

        // Late reply: no panic, no second settlement
        outbound.resolve(json!("too late"));
        assert_eq!(connection.listener_count(SignalKind::LinkClosed), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_completions() {
        let (connection, mut rx) = Connection::new();

        let first = start(Some(&connection), "node:query:fetch", vec![json!(1)]).unwrap();
        let second = start(Some(&connection), "node:query:fetch", vec![json!(2)]).unwrap();

        let out_first = next_outbound(&mut rx).await;
        let out_second = next_outbound(&mut rx).await;
        out_second.resolve(json!("page-2"));
        out_first.resolve(json!("page-1"));

        assert_eq!(second.await.unwrap(), json!("page-2"));
        assert_eq!(first.await.unwrap(), json!("page-1"));
    }

    #[tokio::test]
    async fn test_dropped_connection_settles_pending() {
        let (connection, rx) = Connection::new();

        let pending = start(Some(&connection), "node:topology", vec![]).unwrap();
        drop(rx);
        drop(connection);

        let err = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_dropping_pending_call_removes_listener_and_abandons() {
        let (connection, mut outlet) = Connection::new();

        let pending = start(Some(&connection), "node:topology", vec![]).unwrap();
        assert_eq!(connection.listener_count(SignalKind::LinkClosed), 1);

        drop(pending);
        assert_eq!(connection.listener_count(SignalKind::LinkClosed), 0);

        let id = match outlet.next().await {
            Some(Delivery::Call(call)) => call.id,
            other => panic!("Expected call, got {:?}", other),
        };
        match outlet.next().await {
            Some(Delivery::Abandoned(abandoned)) => assert_eq!(abandoned, id),
            other => panic!("Expected abandonment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settled_call_is_not_abandoned() {
        let (connection, mut outlet) = Connection::new();

        let pending = start(Some(&connection), "node:topology", vec![]).unwrap();
        next_outbound(&mut outlet).await.resolve(json!("done"));
        assert_eq!(pending.await.unwrap(), json!("done"));

        // Nothing left for the transport: no abandonment follows the call
        assert!(timeout(Duration::from_millis(20), outlet.next()).await.is_err());
    }
}
