//! Most-recent-first view over received events.

use std::collections::VecDeque;

use crate::event::NetworkEvent;

/// Ordered event view, newest first.
///
/// With a capacity set, the oldest events are dropped once it is reached.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    events: VecDeque<NetworkEvent>,
    capacity: Option<usize>,
}

impl EventBuffer {
    /// Creates an unbounded buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer that keeps at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity),
        }
    }

    /// Inserts an event in front of every other one.
    pub fn push(&mut self, event: NetworkEvent) {
        self.events.push_front(event);
        if let Some(cap) = self.capacity {
            self.events.truncate(cap);
        }
    }

    /// Inserts events given in arrival order (oldest first).
    pub fn extend_oldest_first<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = NetworkEvent>,
    {
        for event in events {
            self.push(event);
        }
    }

    /// Iterates newest first.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkEvent> {
        self.events.iter()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
