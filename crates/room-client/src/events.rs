//! Event routing for signaling messages.
//!
//! Consumers register handlers for a [`MessageKind`]; on emit, the
//! kind-specific handlers run in registration order, then the wildcard
//! handlers, synchronously on the dispatching task. Heartbeat traffic
//! (`ping`/`pong`) is excluded from the wildcard channel so log-oriented
//! consumers are not flooded.
//!
//! A failing handler never stops dispatch: the error is logged and
//! reported on the session's fault channel, and the remaining handlers
//! still run. Connection lifecycle problems travel on the same fault
//! channel so media teardown logic does not have to parse signaling
//! traffic.

use signal_proto::{Message, MessageKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// Handle identifying one registered handler, for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Out-of-band session notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFault {
    /// A registered handler returned an error; dispatch continued.
    Handler { kind: MessageKind, error: String },
    /// The transport dropped. When `reconnecting` is false the session is
    /// done and will not come back.
    ConnectionLost { reconnecting: bool },
    /// A reconnect attempt succeeded and signaling is flowing again.
    Reconnected,
    /// No inbound traffic arrived within the staleness timeout; the
    /// connection is being torn down and retried.
    KeepaliveTimeout,
    /// The session was closed deliberately.
    Closed,
}

/// A message handler. Runs synchronously on the dispatching task, so it
/// must not block; hand off to a channel for long work.
pub type Handler = Box<dyn FnMut(&Message) -> anyhow::Result<()> + Send>;

/// Handlers are individually locked so dispatch can run them after
/// releasing the registry lock.
type SharedHandler = Arc<Mutex<Handler>>;

struct Inner {
    by_kind: HashMap<MessageKind, Vec<(SubscriptionId, SharedHandler)>>,
    wildcard: Vec<(SubscriptionId, SharedHandler)>,
}

/// Handler registry for one direction of traffic.
///
/// The session owns two: one for inbound messages, one for outbound
/// messages successfully written to the wire. Cloning shares the registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
    faults: mpsc::UnboundedSender<SessionFault>,
}

impl EventBus {
    /// Create a bus reporting handler failures on `faults`.
    #[must_use]
    pub fn new(faults: mpsc::UnboundedSender<SessionFault>) -> Self {
        EventBus {
            inner: Arc::new(Mutex::new(Inner {
                by_kind: HashMap::new(),
                wildcard: Vec::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            faults,
        }
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a handler for one message kind.
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        let id = self.allocate_id();
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .by_kind
                .entry(kind)
                .or_default()
                .push((id, Arc::new(Mutex::new(Box::new(handler)))));
        }
        id
    }

    /// Register a handler for every kind except heartbeats.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        let id = self.allocate_id();
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .wildcard
                .push((id, Arc::new(Mutex::new(Box::new(handler)))));
        }
        id
    }

    /// Remove one handler. Safe to call with an id that is already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut inner) = self.inner.lock() {
            for handlers in inner.by_kind.values_mut() {
                handlers.retain(|(handler_id, _)| *handler_id != id);
            }
            inner.wildcard.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Dispatch one message: kind handlers in registration order, then
    /// wildcard handlers unless the kind is a heartbeat.
    ///
    /// The registry lock is released before any handler runs, so handlers
    /// may subscribe or unsubscribe on this bus. A handler removed
    /// mid-dispatch still sees the message being dispatched; one added
    /// mid-dispatch first sees the next message.
    pub fn emit(&self, message: &Message) {
        let kind = message.kind();
        let selected = {
            let Ok(inner) = self.inner.lock() else {
                warn!(target: "signal.events", %kind, "registry lock poisoned, dropping message");
                return;
            };
            let mut selected: Vec<(SubscriptionId, SharedHandler)> =
                inner.by_kind.get(&kind).cloned().unwrap_or_default();
            if !kind.is_heartbeat() {
                selected.extend(inner.wildcard.iter().cloned());
            }
            selected
        };
        for (id, handler) in selected {
            let Ok(mut handler) = handler.try_lock() else {
                // Re-entrant emit of the same kind from inside its own
                // handler; running it again would never terminate.
                warn!(target: "signal.events", %kind, subscription = id.0, "handler re-entered, skipping");
                continue;
            };
            self.report_failure(kind, id, (*handler)(message));
        }
    }

    fn report_failure(
        &self,
        kind: MessageKind,
        id: SubscriptionId,
        result: anyhow::Result<()>,
    ) {
        if let Err(error) = result {
            warn!(
                target: "signal.events",
                %kind,
                subscription = id.0,
                %error,
                "handler failed, continuing dispatch"
            );
            let _ = self.faults.send(SessionFault::Handler {
                kind,
                error: error.to_string(),
            });
        }
    }

    /// Number of registered handlers for a kind.
    #[must_use]
    pub fn handler_count(&self, kind: MessageKind) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.by_kind.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn bus() -> (EventBus, mpsc::UnboundedReceiver<SessionFault>) {
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();
        (EventBus::new(faults_tx), faults_rx)
    }

    #[test]
    fn test_kind_handler_receives_only_its_kind() {
        let (bus, _faults) = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(MessageKind::Pong, move |message| {
            sink.lock().unwrap().push(message.clone());
            Ok(())
        });

        bus.emit(&Message::Ping(1));
        bus.emit(&Message::Pong(2));

        assert_eq!(*seen.lock().unwrap(), vec![Message::Pong(2)]);
    }

    #[test]
    fn test_kind_handlers_run_before_wildcard_in_registration_order() {
        let (bus, _faults) = bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&order);
        bus.subscribe_all(move |_| {
            sink.lock().unwrap().push("wildcard");
            Ok(())
        });
        let sink = Arc::clone(&order);
        bus.subscribe(MessageKind::RefreshToken, move |_| {
            sink.lock().unwrap().push("first");
            Ok(())
        });
        let sink = Arc::clone(&order);
        bus.subscribe(MessageKind::RefreshToken, move |_| {
            sink.lock().unwrap().push("second");
            Ok(())
        });

        bus.emit(&Message::RefreshToken("tok".to_string()));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "wildcard"]);
    }

    #[test]
    fn test_wildcard_excludes_heartbeats() {
        let (bus, _faults) = bus();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(&Message::Ping(1));
        bus.emit(&Message::Pong(2));
        bus.emit(&Message::RefreshToken("tok".to_string()));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_receives_unrecognized() {
        let (bus, _faults) = bus();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(&Message::Unrecognized {
            kind: "simulate".to_string(),
            payload: serde_json::json!({}),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_does_not_stop_dispatch() {
        let (bus, mut faults) = bus();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(MessageKind::Pong, |_| anyhow::bail!("handler exploded"));
        let counter = Arc::clone(&count);
        bus.subscribe(MessageKind::Pong, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(&Message::Pong(9));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        match faults.try_recv().unwrap() {
            SessionFault::Handler { kind, error } => {
                assert_eq!(kind, MessageKind::Pong);
                assert!(error.contains("handler exploded"));
            }
            other => unreachable!("unexpected fault {other:?}"),
        }
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let (bus, _faults) = bus();
        let count = Arc::new(AtomicUsize::new(0));

        let registrar = bus.clone();
        let counter = Arc::clone(&count);
        let mut registered = false;
        bus.subscribe(MessageKind::RefreshToken, move |_| {
            if !registered {
                registered = true;
                let counter = Arc::clone(&counter);
                registrar.subscribe(MessageKind::Pong, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
            }
            Ok(())
        });

        bus.emit(&Message::RefreshToken("tok".to_string()));
        bus.emit(&Message::Pong(1));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let (bus, _faults) = bus();
        let count = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let remover = bus.clone();
        let counter = Arc::clone(&count);
        let id_slot = Arc::clone(&own_id);
        let id = bus.subscribe(MessageKind::Pong, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_slot.lock().unwrap() {
                remover.unsubscribe(id);
            }
            Ok(())
        });
        *own_id.lock().unwrap() = Some(id);

        bus.emit(&Message::Pong(1));
        bus.emit(&Message::Pong(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(MessageKind::Pong), 0);
    }

    #[test]
    fn test_unsubscribe_removes_by_id() {
        let (bus, _faults) = bus();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = bus.subscribe(MessageKind::Pong, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(bus.handler_count(MessageKind::Pong), 1);

        bus.unsubscribe(id);
        bus.emit(&Message::Pong(1));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(MessageKind::Pong), 0);
    }
}
