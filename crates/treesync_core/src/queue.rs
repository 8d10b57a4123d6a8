//! Ordered event delivery outside the state lock.
//!
//! State changes produce [`EventBatch`]es while the owner of the state holds
//! its lock. The batches are pushed onto an [`EventQueue`] before that lock is
//! released, so the queue order is the mutation order. Delivery happens after
//! the lock is released: whichever caller gets the delivery guard drains the
//! queue in order. A sink that calls back into the engine only enqueues; its
//! events are delivered after the batch being delivered.

use crate::error::SinkError;
use crate::event::Event;
use crate::listener::{DeliveryStats, EventSink, ListenerHandle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A listener's sink, shared between the registry and queued batches.
pub(crate) struct SinkSlot {
    sink: Mutex<Box<dyn EventSink>>,
    detached: AtomicBool,
}

impl SinkSlot {
    pub(crate) fn new(sink: Box<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(sink),
            detached: AtomicBool::new(false),
        })
    }

    /// Stops delivery of batches that are still queued.
    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    fn send(&self, event: &Event) -> Result<(), SinkError> {
        self.sink.lock().on_event(event)
    }
}

/// Events of one recomputation for one listener.
pub struct EventBatch {
    listener: ListenerHandle,
    slot: Arc<SinkSlot>,
    events: Vec<Event>,
}

impl EventBatch {
    pub(crate) fn new(listener: ListenerHandle, slot: Arc<SinkSlot>, events: Vec<Event>) -> Self {
        Self {
            listener,
            slot,
            events,
        }
    }

    /// Returns the listener the batch is for.
    pub fn listener(&self) -> ListenerHandle {
        self.listener
    }

    /// Returns the events.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Hands the events to the sink; returns the delivery counts.
    ///
    /// Errors and panics from the sink are logged and counted.
    fn deliver(&self) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        if self.slot.detached.load(Ordering::SeqCst) {
            return stats;
        }
        for event in &self.events {
            match catch_unwind(AssertUnwindSafe(|| self.slot.send(event))) {
                Ok(Ok(())) => stats.events_delivered += 1,
                Ok(Err(err)) => {
                    warn!(listener = %self.listener, error = %err, "sink rejected event");
                    stats.sink_failures += 1;
                }
                Err(_) => {
                    warn!(listener = %self.listener, "sink panicked");
                    stats.sink_failures += 1;
                }
            }
        }
        stats
    }
}

impl std::fmt::Debug for EventBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBatch")
            .field("listener", &self.listener)
            .field("events", &self.events)
            .finish()
    }
}

/// FIFO of event batches waiting for delivery.
#[derive(Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<EventBatch>>,
    delivering: Mutex<()>,
    stats: Mutex<DeliveryStats>,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends batches in order.
    pub fn enqueue(&self, batches: impl IntoIterator<Item = EventBatch>) {
        self.pending.lock().extend(batches);
    }

    /// Delivers queued batches until the queue is empty.
    ///
    /// Returns at once if another call is already delivering, including a
    /// call further up the same stack; that call picks up the new batches.
    pub fn drain(&self) {
        loop {
            let Some(_guard) = self.delivering.try_lock() else {
                return;
            };
            loop {
                let Some(batch) = self.pending.lock().pop_front() else {
                    break;
                };
                let delivered = batch.deliver();
                let mut stats = self.stats.lock();
                stats.events_delivered += delivered.events_delivered;
                stats.sink_failures += delivered.sink_failures;
            }
            drop(_guard);
            // A batch enqueued while the guard was being released was not
            // picked up by its producer.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    /// Returns the number of batches waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Returns delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        *self.stats.lock()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::path::Path;
    use std::sync::Mutex as StdMutex;

    fn value(n: i64) -> Event {
        Event::Value {
            path: Path::root(),
            node: Node::from(n),
        }
    }

    fn recording(seen: &Arc<StdMutex<Vec<Event>>>) -> Arc<SinkSlot> {
        let seen = Arc::clone(seen);
        SinkSlot::new(Box::new(move |event: &Event| -> Result<(), SinkError> {
            seen.lock().unwrap().push(event.clone());
            Ok(())
        }))
    }

    #[test]
    fn batches_are_delivered_in_order() {
        let queue = EventQueue::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let slot = recording(&seen);
        let handle = ListenerHandle::from_raw(1);
        queue.enqueue([
            EventBatch::new(handle, Arc::clone(&slot), vec![value(1), value(2)]),
            EventBatch::new(handle, slot, vec![value(3)]),
        ]);
        assert_eq!(queue.len(), 2);

        queue.drain();
        assert!(queue.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![value(1), value(2), value(3)]);
        assert_eq!(queue.stats().events_delivered, 3);
    }

    #[test]
    fn detached_sinks_are_skipped() {
        let queue = EventQueue::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let slot = recording(&seen);
        queue.enqueue([EventBatch::new(
            ListenerHandle::from_raw(1),
            Arc::clone(&slot),
            vec![value(1)],
        )]);
        slot.detach();
        queue.drain();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.stats(), DeliveryStats::default());
    }

    #[test]
    fn nested_drain_defers_to_the_outer_one() {
        let queue = Arc::new(EventQueue::new());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let later = recording(&seen);

        let inner_queue = Arc::clone(&queue);
        let inner_seen = Arc::clone(&seen);
        let reentrant = SinkSlot::new(Box::new(move |event: &Event| -> Result<(), SinkError> {
            inner_seen.lock().unwrap().push(event.clone());
            inner_queue.enqueue([EventBatch::new(
                ListenerHandle::from_raw(2),
                Arc::clone(&later),
                vec![value(2)],
            )]);
            inner_queue.drain();
            // The nested batch waits for this one to finish.
            assert_eq!(inner_seen.lock().unwrap().len(), 1);
            Ok(())
        }));

        queue.enqueue([EventBatch::new(
            ListenerHandle::from_raw(1),
            reentrant,
            vec![value(1)],
        )]);
        queue.drain();
        assert_eq!(*seen.lock().unwrap(), vec![value(1), value(2)]);
        assert_eq!(queue.stats().sink_failures, 0);
    }
}
