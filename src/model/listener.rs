//! Listener fan-out for markup model changes.
//!
//! Listeners are kept in registration order in a copy-on-write list: firing
//! takes a snapshot, so a listener may unsubscribe (or subscribe another one)
//! from inside its callback without disturbing the dispatch in progress.
//! Registration returns a [`Subscription`]; dropping it deregisters.

use crate::model::highlighter::HighlighterInfo;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Change notification delivered synchronously to every listener
#[derive(Debug, Clone)]
pub enum MarkupEvent {
    /// A highlighter was added and is already queryable
    AfterAdded(HighlighterInfo),

    /// A highlighter is about to be removed; it is still queryable
    BeforeRemoved(HighlighterInfo),

    /// Styling of a highlighter changed
    AttributesChanged {
        highlighter: HighlighterInfo,
        /// Gutter icon or line separator changed, not just text attributes
        renderers_changed: bool,
    },
}

impl MarkupEvent {
    pub fn highlighter(&self) -> &HighlighterInfo {
        match self {
            MarkupEvent::AfterAdded(info) | MarkupEvent::BeforeRemoved(info) => info,
            MarkupEvent::AttributesChanged { highlighter, .. } => highlighter,
        }
    }
}

/// Observer of markup model changes
pub trait MarkupModelListener: Send + Sync {
    fn on_event(&self, event: &MarkupEvent);
}

impl<F> MarkupModelListener for F
where
    F: Fn(&MarkupEvent) + Send + Sync,
{
    fn on_event(&self, event: &MarkupEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Registered {
    id: ListenerId,
    listener: Arc<dyn MarkupModelListener>,
}

#[derive(Default)]
struct Shared {
    entries: Arc<Vec<Registered>>,
    next_id: u64,
}

impl Shared {
    fn remove(&mut self, id: ListenerId) -> bool {
        match self.entries.iter().position(|r| r.id == id) {
            Some(pos) => {
                Arc::make_mut(&mut self.entries).remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Registration-ordered list of listeners
#[derive(Default)]
pub struct ListenerList {
    shared: Arc<Mutex<Shared>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it stays registered until the subscription is dropped
    pub fn add(&self, listener: Arc<dyn MarkupModelListener>) -> Subscription {
        let mut shared = self.shared.lock();
        let id = ListenerId(shared.next_id);
        shared.next_id += 1;
        Arc::make_mut(&mut shared.entries).push(Registered { id, listener });
        tracing::trace!("Registered markup listener {:?}", id);

        Subscription {
            id,
            list: Arc::downgrade(&self.shared),
            active: true,
        }
    }

    /// Deliver `event` to a snapshot of the current listeners
    pub fn fire(&self, event: &MarkupEvent) {
        let snapshot = Arc::clone(&self.shared.lock().entries);
        for registered in snapshot.iter() {
            registered.listener.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.len())
            .finish()
    }
}

/// Keeps a listener registered. Dropping it removes the listener.
#[must_use = "dropping a Subscription immediately removes the listener"]
pub struct Subscription {
    id: ListenerId,
    list: Weak<Mutex<Shared>>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener registered for as long as the model lives
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        // The model may already be gone; nothing to deregister then
        let Some(shared) = self.list.upgrade() else {
            return;
        };
        if !shared.lock().remove(self.id) {
            tracing::error!("Markup listener {:?} was not registered", self.id);
            debug_assert!(false, "removing unknown markup listener {:?}", self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::highlighter::{
        HighlighterHandle, HighlighterId, HighlighterStyle, RangeHighlighter, TargetArea,
    };
    use crate::model::interval_tree::{Interval, IntervalTree};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> MarkupEvent {
        let mut tree = IntervalTree::new();
        let slot = tree.insert(Interval::new(0, 1), ());
        let id = HighlighterId::next();
        MarkupEvent::AfterAdded(HighlighterInfo {
            handle: HighlighterHandle::new(id, TargetArea::ExactRange, slot),
            interval: Interval::new(0, 1),
            affected_start: 0,
            highlighter: RangeHighlighter {
                id,
                target_area: TargetArea::ExactRange,
                layer: 0,
                persistent: false,
                style: HighlighterStyle::default(),
            },
        })
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn MarkupModelListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener: Arc<dyn MarkupModelListener> = Arc::new(move |_: &MarkupEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn test_fire_reaches_all_listeners() {
        let list = ListenerList::new();
        let (a, la) = counter();
        let (b, lb) = counter();
        let _sa = list.add(la);
        let _sb = list.add(lb);

        list.fire(&sample_event());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_subscription_removes_listener() {
        let list = ListenerList::new();
        let (count, listener) = counter();
        let subscription = list.add(listener);
        assert_eq!(list.len(), 1);

        drop(subscription);
        assert!(list.is_empty());
        list.fire(&sample_event());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detached_subscription_keeps_listener() {
        let list = ListenerList::new();
        let (count, listener) = counter();
        list.add(listener).detach();

        list.fire(&sample_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_subscription_outliving_list_is_harmless() {
        let list = ListenerList::new();
        let (_, listener) = counter();
        let subscription = list.add(listener);
        drop(list);
        subscription.unsubscribe();
    }

    #[test]
    fn test_unsubscribe_during_fire_uses_snapshot() {
        let list = ListenerList::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let (second, second_listener) = counter();

        let slot_in_listener = Arc::clone(&slot);
        let first = list.add(Arc::new(move |_: &MarkupEvent| {
            // Drop the second listener's subscription mid-dispatch
            slot_in_listener.lock().take();
        }));
        *slot.lock() = Some(list.add(second_listener));

        list.fire(&sample_event());
        // Snapshot still delivered to the second listener
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 1);

        list.fire(&sample_event());
        assert_eq!(second.load(Ordering::SeqCst), 1);
        drop(first);
    }
}
