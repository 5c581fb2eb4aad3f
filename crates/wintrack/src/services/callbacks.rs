//! Ordered fan-out of change notifications.
//!
//! `Callbacks<T>` is the change sink behind the entity store. Subscribers may
//! react to a notification by calling back into the store; any notification
//! raised while a delivery is in progress is queued and delivered after the
//! current one, so every subscriber sees events in emission order.
//!
//! ```rust,ignore
//! let sink: Callbacks<Change> = Callbacks::new();
//! let id = sink.register(|change| println!("{change:?}"));
//! sink.notify(Change::Trigger("hyprland_connected".into()));
//! sink.unregister(id);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle returned by [`Callbacks::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Clears the delivery flag even if a subscriber unwinds.
struct Delivering<'a>(&'a Cell<bool>);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

type Subscriber<T> = (SubscriptionId, Rc<dyn Fn(&T)>);

/// Single-threaded, re-entrancy safe subscriber list.
pub struct Callbacks<T> {
    subscribers: RefCell<Vec<Subscriber<T>>>,
    queue: RefCell<VecDeque<T>>,
    delivering: Cell<bool>,
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
        }
    }

    pub fn register<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + 'static,
    {
        let id = SubscriptionId::next();
        self.subscribers.borrow_mut().push((id, Rc::new(callback)));
        id
    }

    /// Returns `true` if the subscription existed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() < before
    }

    /// Queue `event` and deliver everything pending unless a delivery is
    /// already running further up the stack.
    pub fn notify(&self, event: T) {
        self.queue.borrow_mut().push_back(event);
        if self.delivering.replace(true) {
            return;
        }
        let _guard = Delivering(&self.delivering);

        loop {
            let Some(event) = self.queue.borrow_mut().pop_front() else {
                break;
            };
            // Snapshot so subscribers may (un)register while being called.
            let targets: Vec<_> = self
                .subscribers
                .borrow()
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect();
            for cb in targets {
                cb(&event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.borrow().is_empty()
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_notify() {
        let sink: Callbacks<i32> = Callbacks::new();
        let total = Rc::new(Cell::new(0));

        let t = total.clone();
        sink.register(move |v| t.set(t.get() + *v));
        sink.notify(5);
        sink.notify(3);

        assert_eq!(total.get(), 8);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_delivery_resumes_after_subscriber_panic() {
        let sink: Callbacks<i32> = Callbacks::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = seen.clone();
        sink.register(move |v| {
            if *v < 0 {
                panic!("negative");
            }
            s.borrow_mut().push(*v);
        });
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.notify(-1)));
        assert!(result.is_err());

        sink.notify(7);
        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let sink: Callbacks<i32> = Callbacks::new();
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        let id = sink.register(move |_| h.set(h.get() + 1));
        sink.notify(1);
        assert!(sink.unregister(id));
        sink.notify(1);

        assert_eq!(hits.get(), 1);
        assert!(sink.is_empty());
        assert!(!sink.unregister(id));
    }

    #[test]
    fn test_nested_notify_is_delivered_in_order() {
        let sink: Rc<Callbacks<&'static str>> = Rc::new(Callbacks::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&sink);
        let s = seen.clone();
        sink.register(move |event| {
            s.borrow_mut().push(format!("a:{event}"));
            if *event == "first"
                && let Some(sink) = weak.upgrade()
            {
                sink.notify("nested");
            }
        });
        let s = seen.clone();
        sink.register(move |event| s.borrow_mut().push(format!("b:{event}")));

        sink.notify("first");

        assert_eq!(
            *seen.borrow(),
            vec!["a:first", "b:first", "a:nested", "b:nested"]
        );
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert_ne!(a, b);
    }
}
