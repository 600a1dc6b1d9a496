//! Bounded, ordered retention of recent events.

use std::collections::VecDeque;
use std::sync::Arc;

use switchboard_core::{Event, Sequence};

/// Fixed-capacity ring of the most recently retained events, ascending by id.
///
/// Not synchronized: the broker owns it behind its registry lock.
#[derive(Debug)]
pub struct Backlog {
    events: VecDeque<Arc<Event>>,
    capacity: usize,
}

impl Backlog {
    /// Create an empty backlog. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an event, evicting the oldest when full.
    ///
    /// Ids must be pushed in ascending order; returns the evicted event.
    pub fn push(&mut self, event: Arc<Event>) -> Option<Arc<Event>> {
        debug_assert!(self.newest_id().is_none_or(|newest| event.id > newest));
        let evicted = if self.events.len() == self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Every retained event with id strictly greater than `after`, oldest first.
    pub fn since(&self, after: Sequence) -> Vec<Arc<Event>> {
        let start = self.events.partition_point(|e| e.id <= after);
        self.events.range(start..).cloned().collect()
    }

    /// Id of the oldest retained event.
    pub fn oldest_id(&self) -> Option<Sequence> {
        self.events.front().map(|e| e.id)
    }

    /// Id of the newest retained event.
    pub fn newest_id(&self) -> Option<Sequence> {
        self.events.back().map(|e| e.id)
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been buffered yet.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Maximum number of events retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
