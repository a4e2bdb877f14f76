//! Pending queue: strict FIFO, no priorities.

use std::collections::VecDeque;

use crate::request::Descriptor;

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<Descriptor>,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends at the tail. Rerouted descriptors come back through here too.
    pub(crate) fn enqueue(&mut self, descriptor: Descriptor) {
        self.items.push_back(descriptor);
    }

    pub(crate) fn dequeue_front(&mut self) -> Option<Descriptor> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
