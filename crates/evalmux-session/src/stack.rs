use std::sync::Arc;

use evalmux_core::Contexts;

use crate::source::RequestSource;

/// A matched request and the contexts of the prompt it was matched to.
pub(crate) struct ActiveEntry {
    pub(crate) source: Arc<RequestSource>,
    pub(crate) contexts: Contexts,
}

impl ActiveEntry {
    pub(crate) fn new(source: Arc<RequestSource>, contexts: Contexts) -> Self {
        Self { source, contexts }
    }

    pub(crate) fn depth(&self) -> usize {
        self.contexts.depth()
    }
}

/// LIFO of matched requests whose evaluation has not returned yet.
///
/// Owned by the engine side and never shared. Depths never decrease from
/// bottom to top; the top is the only entry that can be waiting for input.
#[derive(Default)]
pub(crate) struct ActiveStack {
    entries: Vec<ActiveEntry>,
}

impl ActiveStack {
    pub(crate) fn push(&mut self, entry: ActiveEntry) {
        debug_assert!(
            self.top_depth().is_none_or(|top| top <= entry.depth()),
            "active stack depth must not decrease"
        );
        self.entries.push(entry);
    }

    /// Pop every entry at `depth` or deeper, innermost first.
    pub(crate) fn unwind_to(&mut self, depth: usize) -> Vec<ActiveEntry> {
        let keep = self
            .entries
            .iter()
            .position(|e| e.depth() >= depth)
            .unwrap_or(self.entries.len());
        let mut popped = self.entries.split_off(keep);
        popped.reverse();
        popped
    }

    /// Pop everything, innermost first.
    pub(crate) fn drain(&mut self) -> Vec<ActiveEntry> {
        self.unwind_to(0)
    }

    pub(crate) fn any_hidden(&self) -> bool {
        self.entries.iter().any(|e| !e.source.is_visible())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ActiveEntry> {
        self.entries.iter()
    }

    pub(crate) fn top_depth(&self) -> Option<usize> {
        self.entries.last().map(ActiveEntry::depth)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalmux_core::{CallFlag, RequestId};

    fn entry(visible: bool, contexts: Contexts) -> ActiveEntry {
        let (source, _rx) = RequestSource::new(RequestId::new(), visible, None);
        ActiveEntry::new(source, contexts)
    }

    fn at_depth(depth: usize) -> Contexts {
        (0..depth)
            .map(|i| if i + 1 == depth { CallFlag::Toplevel } else { CallFlag::Browser })
            .collect()
    }

    #[test]
    fn unwind_pops_entries_at_or_deeper() {
        let mut stack = ActiveStack::default();
        stack.push(entry(true, at_depth(1)));
        stack.push(entry(true, at_depth(2)));
        stack.push(entry(true, at_depth(3)));

        let popped = stack.unwind_to(2);
        let depths: Vec<usize> = popped.iter().map(ActiveEntry::depth).collect();
        assert_eq!(depths, vec![3, 2]);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.top_depth(), Some(1));
    }

    #[test]
    fn unwind_deeper_than_top_pops_nothing() {
        let mut stack = ActiveStack::default();
        stack.push(entry(true, at_depth(1)));
        assert!(stack.unwind_to(2).is_empty());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn equal_depth_entries_unwind_together() {
        let mut stack = ActiveStack::default();
        stack.push(entry(true, at_depth(2)));
        stack.push(entry(true, at_depth(2)));
        assert_eq!(stack.unwind_to(2).len(), 2);
        assert_eq!(stack.top_depth(), None);
    }

    #[test]
    fn any_hidden_covers_whole_stack() {
        let mut stack = ActiveStack::default();
        stack.push(entry(false, at_depth(1)));
        stack.push(entry(true, at_depth(2)));
        assert!(stack.any_hidden());
        stack.unwind_to(1);
        assert!(!stack.any_hidden());
    }

    #[test]
    fn drain_empties_innermost_first() {
        let mut stack = ActiveStack::default();
        stack.push(entry(true, at_depth(1)));
        stack.push(entry(true, at_depth(3)));
        let depths: Vec<usize> = stack.drain().iter().map(ActiveEntry::depth).collect();
        assert_eq!(depths, vec![3, 1]);
        assert_eq!(stack.len(), 0);
    }
}
