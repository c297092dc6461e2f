//! Mutable values
//!
//! A [`MutableValue`] is a listenable reference cell holding one
//! [`ShareableValue`]. It is the unit of reactive state: mappers subscribe to
//! their inputs and are marked dirty whenever an input is written.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use worklets_common::sync::lock;
use worklets_common::RuntimeKind;

use crate::shareable::{next_id, ShareableValue};

/// Change callback. Listeners receive no payload.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Hook asking the owning module for a render frame.
pub type RenderRequest = Arc<dyn Fn() + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Shared, mutable, listenable cell.
pub struct MutableValue {
    id: u64,
    owner: RuntimeKind,
    value: Mutex<ShareableValue>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    render_request: Option<RenderRequest>,
}

impl MutableValue {
    /// Creates a cell owned by `owner`. Writes issued on the other runtime
    /// are redirected to the owner through the scheduler.
    pub fn new(owner: RuntimeKind, value: ShareableValue) -> Self {
        Self {
            id: next_id(),
            owner,
            value: Mutex::new(value),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            render_request: None,
        }
    }

    /// Creates a cell that calls `render_request` after every write.
    pub fn with_render_request(owner: RuntimeKind, value: ShareableValue, render_request: RenderRequest) -> Self {
        Self {
            render_request: Some(render_request),
            ..Self::new(owner, value)
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> RuntimeKind {
        self.owner
    }

    pub fn get(&self) -> ShareableValue {
        lock(&self.value).clone()
    }

    /// Replaces the held value, then notifies listeners in registration order
    /// on the calling thread and requests a render frame.
    pub fn set(&self, value: ShareableValue) {
        *lock(&self.value) = value;

        // Listeners may add or revoke listeners, so iterate over a snapshot
        // and skip entries revoked by an earlier callback.
        let snapshot: Vec<(u64, Listener)> = lock(&self.listeners).clone();
        for (id, listener) in snapshot {
            let registered = lock(&self.listeners).iter().any(|(other, _)| *other == id);
            if registered {
                listener();
            }
        }

        if let Some(request) = &self.render_request {
            request();
        }
    }

    /// Registers `listener`. It stays registered until the returned handle is
    /// revoked or dropped.
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerHandle {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
            active: true,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl fmt::Debug for MutableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableValue")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Subscription to a [`MutableValue`]. Detaches exactly once, on
/// [`ListenerHandle::revoke`] or drop.
#[must_use = "dropping a listener handle removes the listener"]
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerList>,
    active: bool,
}

impl ListenerHandle {
    pub fn revoke(mut self) {
        self.detach();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn detach(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_get_returns_latest_value() {
        let value = MutableValue::new(RuntimeKind::Ui, ShareableValue::from(1));
        assert_eq!(value.get().as_number(), Some(1.0));

        value.set(ShareableValue::from(2));
        assert_eq!(value.get().as_number(), Some(2.0));
        assert_eq!(value.owner(), RuntimeKind::Ui);
    }

    #[test]
    fn test_listeners_notified_in_registration_order() {
        let value = MutableValue::new(RuntimeKind::Ui, ShareableValue::from(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                value.add_listener(move || lock(&order).push(i))
            })
            .collect();

        value.set(ShareableValue::from(1));
        assert_eq!(*lock(&order), vec![0, 1, 2]);
        drop(handles);
    }

    #[test]
    fn test_revoked_listener_not_called() {
        let value = MutableValue::new(RuntimeKind::Ui, ShareableValue::from(0));
        let (count, listener) = counter();
        let handle = value.add_listener(listener);
        assert_eq!(value.listener_count(), 1);

        handle.revoke();
        assert_eq!(value.listener_count(), 0);
        value.set(ShareableValue::from(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropping_handle_detaches() {
        let value = MutableValue::new(RuntimeKind::Main, ShareableValue::null());
        {
            let _handle = value.add_listener(|| {});
            assert_eq!(value.listener_count(), 1);
        }
        assert_eq!(value.listener_count(), 0);
    }

    #[test]
    fn test_handle_outliving_value_is_harmless() {
        let value = MutableValue::new(RuntimeKind::Ui, ShareableValue::null());
        let handle = value.add_listener(|| {});
        drop(value);
        assert!(handle.is_active());
        handle.revoke();
    }

    #[test]
    fn test_listener_can_add_listener_during_notify() {
        let value = Arc::new(MutableValue::new(RuntimeKind::Ui, ShareableValue::from(0)));
        let spawned = Arc::new(Mutex::new(Vec::new()));
        let (count, late_listener) = counter();
        let late_listener = Arc::new(late_listener);

        let weak = Arc::downgrade(&value);
        let spawned_clone = spawned.clone();
        let _handle = value.add_listener(move || {
            if let Some(value) = weak.upgrade() {
                let late = late_listener.clone();
                lock(&spawned_clone).push(value.add_listener(move || late()));
            }
        });

        value.set(ShareableValue::from(1));
        // The listener added during the first notification only sees later writes.
        assert_eq!(count.load(Ordering::SeqCst), 0);
        value.set(ShareableValue::from(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_revoking_later_listener() {
        let value = MutableValue::new(RuntimeKind::Ui, ShareableValue::from(0));
        let (count, second) = counter();
        let victim: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let victim_clone = victim.clone();
        let _first = value.add_listener(move || {
            lock(&victim_clone).take();
        });
        *lock(&victim) = Some(value.add_listener(second));

        value.set(ShareableValue::from(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(value.listener_count(), 1);
    }

    #[test]
    fn test_set_requests_render() {
        let (requests, request) = counter();
        let value = MutableValue::with_render_request(RuntimeKind::Ui, ShareableValue::from(0), Arc::new(request));

        value.set(ShareableValue::from(1));
        value.set(ShareableValue::from(2));
        assert_eq!(requests.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_writers() {
        let value = Arc::new(MutableValue::new(RuntimeKind::Ui, ShareableValue::from(0)));
        let (count, listener) = counter();
        let _handle = value.add_listener(listener);

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let value = value.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        value.set(ShareableValue::from(i * 10 + j));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 40);
        assert!(value.get().as_number().is_some());
    }
}
