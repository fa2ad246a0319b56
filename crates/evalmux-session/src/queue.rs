use std::collections::VecDeque;
use std::sync::Arc;

use evalmux_core::{Contexts, RequestId};

use crate::source::RequestSource;

/// FIFO of submissions not yet matched to a prompt.
///
/// Many clients push, only the engine pops. Callers guard it with the
/// rendezvous lock.
#[derive(Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<Arc<RequestSource>>,
}

impl PendingQueue {
    pub(crate) fn push(&mut self, source: Arc<RequestSource>) {
        self.items.push_back(source);
    }

    /// Dequeue the head if it matches a prompt at `contexts`.
    ///
    /// Only the head is considered: submissions at one depth are served in
    /// order, and a head waiting for another depth blocks those behind it.
    pub(crate) fn pop_match(&mut self, contexts: &Contexts) -> Option<Arc<RequestSource>> {
        if self.items.front()?.matches(contexts) {
            self.items.pop_front()
        } else {
            None
        }
    }

    pub(crate) fn remove(&mut self, id: &RequestId) -> bool {
        match self.items.iter().position(|s| s.id() == id) {
            Some(idx) => self.items.remove(idx).is_some(),
            None => false,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<RequestSource>> {
        self.items.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
