//! Callback-to-future adapters.
//!
//! The host reports connection state through callbacks. Each callback kind
//! writes into its own single-slot, overwrite-on-send [`EventSlot`], and the
//! connection state machine races receives on those slots.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// A single-value mailbox: a send overwrites any unread value, a receive
/// takes it. Receiving is cancel-safe, a dropped `recv` never loses a value.
#[derive(Debug)]
pub struct EventSlot<T> {
    value:  Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for EventSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventSlot<T> {
    pub fn new() -> Self {
        Self {
            value:  Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn send(&self, value: T) {
        *self.lock() = Some(value);
        self.notify.notify_one();
    }

    pub fn try_recv(&self) -> Option<T> {
        self.lock().take()
    }

    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.try_recv() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Binding problems the host reports through callbacks rather than through
/// the bind call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIssue {
    /// The hosting process died and the binding will not recover.
    BindingDied,
    /// The service returned no binder at all.
    NullBinding,
}

struct ConnectionSlots<B> {
    connected:    EventSlot<B>,
    disconnected: EventSlot<()>,
    issue:        EventSlot<ConnectionIssue>,
}

/// Callback object registered with the host for one bind cycle.
pub struct ServiceConnection<B> {
    slots: Arc<ConnectionSlots<B>>,
}

impl<B> Clone for ServiceConnection<B> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<B> Default for ServiceConnection<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> ServiceConnection<B> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(ConnectionSlots {
                connected:    EventSlot::new(),
                disconnected: EventSlot::new(),
                issue:        EventSlot::new(),
            }),
        }
    }

    /// Host callback: the service is up and `binder` is live.
    pub fn service_connected(&self, binder: B) {
        tracing::debug!("Service connected");
        self.slots.connected.send(binder);
    }

    /// Host callback: the hosting process went away; the host may reconnect.
    pub fn service_disconnected(&self) {
        tracing::debug!("Service disconnected");
        self.slots.disconnected.send(());
    }

    /// Host callback: the binding is permanently dead.
    pub fn binding_died(&self) {
        tracing::debug!("Binding died");
        self.slots.issue.send(ConnectionIssue::BindingDied);
    }

    /// Host callback: the service declined to return a binder.
    pub fn null_binding(&self) {
        tracing::debug!("Null binding");
        self.slots.issue.send(ConnectionIssue::NullBinding);
    }

    pub async fn connected(&self) -> B {
        self.slots.connected.recv().await
    }

    pub async fn disconnected(&self) {
        self.slots.disconnected.recv().await
    }

    pub async fn issue(&self) -> ConnectionIssue {
        self.slots.issue.recv().await
    }

    /// Whether both handles refer to the same registered callback object.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

/// Receives the host's notification that a remote binder's process died.
#[derive(Clone, Default)]
pub struct DeathRecipient {
    slot: Arc<EventSlot<()>>,
}

impl DeathRecipient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host callback.
    pub fn binder_died(&self) {
        tracing::debug!("Remote binder died");
        self.slot.send(());
    }

    pub async fn died(&self) {
        self.slot.recv().await
    }

    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}
