//! Queue of posted events.
//!
//! Uses a `BinaryHeap` with reversed `Ord` on `PostedEvent` to act as a
//! min-heap keyed by `(at, seq)`. Sequence numbers are strictly
//! increasing, so events posted for the same time fire in posting order
//! and two runs with the same seed dispatch them identically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::event::EventId;
use crate::locus::Element;
use crate::time::SimTime;

/// An event binding to be fired on a specific element at a specific time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedEvent {
    /// Posting order, used as the tie-break.
    pub seq: u64,
    /// Time at which the event fires.
    pub at: SimTime,
    pub event: EventId,
    pub element: Element,
}

/// Ordering: smallest `(at, seq)` first.
///
/// Rust's `BinaryHeap` is a *max*-heap, so we **reverse** the natural
/// ordering here to turn it into a min-heap.
impl Ord for PostedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PostedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Time-ordered queue of posted events.
#[derive(Debug, Clone, Default)]
pub struct PostQueue {
    queue: BinaryHeap<PostedEvent>,
    next_seq: u64,
}

impl PostQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Post `event` on `element` at `at`. Returns the sequence number.
    pub fn post(&mut self, at: SimTime, event: EventId, element: Element) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(PostedEvent { seq, at, event, element });
        seq
    }

    /// Pop the earliest event.
    pub fn pop_next(&mut self) -> Option<PostedEvent> {
        self.queue.pop()
    }

    /// Pop the earliest event if it is due at or before `now`.
    pub fn pop_due(&mut self, now: SimTime) -> Option<PostedEvent> {
        if self.next_time()? <= now {
            self.queue.pop()
        } else {
            None
        }
    }

    /// Time of the earliest event.
    pub fn next_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|p| p.at)
    }

    /// Returns `true` if nothing is posted.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of posted events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;

    fn at(t: f64) -> SimTime {
        SimTime::new(t).unwrap()
    }

    fn node(n: u64) -> Element {
        Element::Node(NodeId::new(n))
    }

    fn drain_ordered(q: &mut PostQueue) -> Vec<PostedEvent> {
        std::iter::from_fn(|| q.pop_next()).collect()
    }

    #[test]
    fn test_fifo_at_same_time() {
        let mut q = PostQueue::new();
        let ev = EventId::new(0);
        q.post(at(1.0), ev, node(1));
        q.post(at(1.0), ev, node(2));
        q.post(at(1.0), ev, node(3));

        let order: Vec<Element> = drain_ordered(&mut q).into_iter().map(|p| p.element).collect();
        assert_eq!(order, vec![node(1), node(2), node(3)]);
    }

    #[test]
    fn test_time_ordering() {
        let mut q = PostQueue::new();
        let ev = EventId::new(0);
        q.post(at(3.0), ev, node(0));
        q.post(at(1.0), ev, node(0));
        q.post(at(2.5), ev, node(0));

        let times: Vec<f64> = drain_ordered(&mut q).iter().map(|p| p.at.as_f64()).collect();
        assert_eq!(times, vec![1.0, 2.5, 3.0]);
    }

    #[test]
    fn test_pop_due() {
        let mut q = PostQueue::new();
        q.post(at(2.0), EventId::new(0), node(0));
        assert!(q.pop_due(at(1.0)).is_none());
        assert_eq!(q.next_time(), Some(at(2.0)));
        assert!(q.pop_due(at(2.0)).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn test_empty_queue() {
        let mut q = PostQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
        assert!(q.pop_next().is_none());
        assert!(q.next_time().is_none());
    }
}
