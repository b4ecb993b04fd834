//! Observer fan-out for controller lifecycle events.
//!
//! Observers are dispatched one at a time (serial dispatch; never
//! concurrent with each other, even across two threads calling `emit`
//! concurrently). A snapshot of the observer list is taken under the
//! registration lock, which is then released before dispatch, so a
//! callback that subscribes/unsubscribes during dispatch cannot deadlock
//! on the registration lock — see spec §9's note on lock-free subscribe
//! with snapshot-on-emit. A separate dispatch lock, held across the whole
//! fan-out loop, is what actually serializes concurrent `emit` callers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::chunk::Chunk;
use crate::ticks::DateTimeOffset;

#[derive(Debug, Clone)]
pub enum Event {
    ReceivedInputData {
        device: String,
        chunk: Chunk,
        at: DateTimeOffset,
    },
    PushedInputData {
        epoch: Uuid,
        at: DateTimeOffset,
    },
    SavedEpoch {
        epoch: Uuid,
        at: DateTimeOffset,
    },
    CompletedEpoch {
        epoch: Uuid,
        at: DateTimeOffset,
    },
    DiscardedEpoch {
        epoch: Uuid,
        at: DateTimeOffset,
    },
    NextEpochRequested {
        at: DateTimeOffset,
    },
}

pub type Observer = dyn Fn(&Event) + Send + Sync;

/// A per-controller fan-out list of observers, with serial dispatch under a
/// single lock. An observer that panics is caught, logged, and never aborts
/// acquisition (spec §7).
#[derive(Default)]
pub struct EventBus {
    observers: Mutex<Vec<Arc<Observer>>>,
    /// Held across the whole fan-out loop in `emit`, separate from
    /// `observers`, so two threads raising events concurrently still run
    /// observer callbacks one at a time instead of interleaved.
    dispatch: Mutex<()>,
}

pub struct Subscription {
    id: usize,
}

impl Subscription {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            observers: Mutex::new(Vec::new()),
            dispatch: Mutex::new(()),
        }
    }

    pub fn subscribe(&self, observer: Arc<Observer>) -> Subscription {
        let mut guard = self.observers.lock();
        guard.push(observer);
        Subscription { id: guard.len() - 1 }
    }

    /// Takes a snapshot of the observer list, releases the registration
    /// lock, then holds the dispatch lock across the whole fan-out loop so
    /// a concurrent `emit` from another thread can't interleave its
    /// callbacks with this one's. A panicking observer is caught and
    /// logged; it does not stop dispatch to the remaining observers and
    /// does not abort acquisition.
    pub fn emit(&self, event: Event) {
        let snapshot: Vec<Arc<Observer>> = self.observers.lock().clone();
        let _dispatch_guard = self.dispatch.lock();
        for observer in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| observer(&event)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "observer panicked".to_string());
                tracing::error!(error = %message, "observer callback panicked; discarding");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_fans_out_to_all_observers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        bus.subscribe(Arc::new(move |_: &Event| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = count.clone();
        bus.subscribe(Arc::new(move |_: &Event| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.emit(Event::NextEpochRequested {
            at: DateTimeOffset { ticks: 0, offset_hours: 0.0 },
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_observer_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(|_: &Event| panic!("boom")));
        let ran2 = ran.clone();
        bus.subscribe(Arc::new(move |_: &Event| {
            ran2.fetch_add(1, Ordering::SeqCst);
        }));
        bus.emit(Event::NextEpochRequested {
            at: DateTimeOffset { ticks: 0, offset_hours: 0.0 },
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
