//! Typed publish/subscribe.
//!
//! [`EventEmitter`] holds an ordered set of handlers for one payload type.
//! [`on`](EventEmitter::on) appends a handler and returns an
//! [`EventSubscription`] whose [`off`](EventSubscription::off) removes that
//! handler again. [`emit`](EventEmitter::emit) invokes every registered
//! handler synchronously, in registration order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//!
//! use seekframe::EventEmitter;
//!
//! let emitter = EventEmitter::<u32>::new();
//! let total = Arc::new(AtomicU32::new(0));
//!
//! let sink = Arc::clone(&total);
//! let subscription = emitter.on(move |value| {
//!     sink.fetch_add(*value, Ordering::SeqCst);
//! });
//!
//! emitter.emit(&2);
//! subscription.off();
//! emitter.emit(&40);
//!
//! assert_eq!(total.load(Ordering::SeqCst), 2);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HandlerTable<T> {
    last_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// An ordered set of handlers for payloads of type `T`.
///
/// Cloning an emitter yields another handle to the same handler set.
pub struct EventEmitter<T> {
    table: Arc<Mutex<HandlerTable<T>>>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EventEmitter")
            .field("handlers", &self.len())
            .finish()
    }
}

impl<T> EventEmitter<T> {
    /// Create an emitter with no handlers.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HandlerTable {
                last_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Register a handler. It stays registered until
    /// [`EventSubscription::off`] or [`clear_all`](EventEmitter::clear_all)
    /// is called; dropping the subscription does not remove it.
    pub fn on<F>(&self, handler: F) -> EventSubscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut table = lock(&self.table);
        table.last_id += 1;
        let id = table.last_id;
        table.handlers.push((id, Arc::new(handler)));
        EventSubscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Invoke every registered handler with `payload`, in registration order.
    ///
    /// Handlers run on the caller's thread after the handler set has been
    /// snapshotted, so a handler may subscribe or unsubscribe without
    /// deadlocking; such changes take effect from the next `emit`.
    pub fn emit(&self, payload: &T) {
        self.emit_while(payload, || true);
    }

    /// Like [`emit`](EventEmitter::emit), but `proceed` is checked before
    /// each handler and delivery stops at the first `false`. Returns the
    /// number of handlers invoked.
    pub fn emit_while(&self, payload: &T, proceed: impl Fn() -> bool) -> usize {
        let handlers: Vec<Handler<T>> = lock(&self.table)
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let mut invoked = 0;
        for handler in handlers {
            if !proceed() {
                break;
            }
            handler(payload);
            invoked += 1;
        }
        invoked
    }

    /// Remove every handler.
    pub fn clear_all(&self) {
        lock(&self.table).handlers.clear();
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        lock(&self.table).handlers.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`EventEmitter::on`].
pub struct EventSubscription<T> {
    id: u64,
    table: Weak<Mutex<HandlerTable<T>>>,
}

impl<T> Debug for EventSubscription<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EventSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<T> EventSubscription<T> {
    /// Remove the handler this subscription refers to. Calling `off` again,
    /// or after the emitter was cleared, has no effect.
    pub fn off(&self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).handlers.retain(|(id, _)| *id != self.id);
        }
    }

    /// Returns `true` while the handler is still registered.
    pub fn is_active(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| lock(&table).handlers.iter().any(|(id, _)| *id == self.id))
    }
}

fn lock<T>(table: &Mutex<HandlerTable<T>>) -> MutexGuard<'_, HandlerTable<T>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}
