//! Snapshot-based undo/redo.
//!
//! Both stacks are bounded; the oldest snapshot is evicted once a stack holds
//! more than `limit` entries. Recording a new snapshot always clears the redo
//! stack, so history stays linear.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

use crate::model::{Document, Section, SectionId, TripMeta};
use crate::MAX_HISTORY_SIZE;

/// The part of a [`Document`] that undo/redo restores. Theme is not included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sections: Vec<Section>,
    pub meta: TripMeta,
    pub collapsed_sections: BTreeSet<SectionId>,
}

impl Snapshot {
    #[must_use]
    pub fn capture(document: &Document) -> Self {
        Self {
            sections: document.sections.clone(),
            meta: document.meta.clone(),
            collapsed_sections: document.collapsed_sections.clone(),
        }
    }

    pub fn restore_into(self, document: &mut Document) {
        document.sections = self.sections;
        document.meta = self.meta;
        document.collapsed_sections = self.collapsed_sections;
    }
}

#[derive(Debug, Clone)]
pub struct History {
    undo_stack: VecDeque<Snapshot>,
    redo_stack: VecDeque<Snapshot>,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(MAX_HISTORY_SIZE)
    }
}

impl History {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Captures `document` before a mutation is applied.
    pub fn record(&mut self, document: &Document) {
        push_bounded(&mut self.undo_stack, Snapshot::capture(document), self.limit);
        self.redo_stack.clear();
        debug!(undo_depth = self.undo_stack.len(), "snapshot recorded");
    }

    /// Steps back one snapshot. Returns false when there is nothing to undo.
    pub fn undo(&mut self, document: &mut Document) -> bool {
        let Some(previous) = self.undo_stack.pop_back() else {
            return false;
        };
        push_bounded(&mut self.redo_stack, Snapshot::capture(document), self.limit);
        previous.restore_into(document);
        debug!(
            undo_depth = self.undo_stack.len(),
            redo_depth = self.redo_stack.len(),
            "undo applied"
        );
        true
    }

    /// Steps forward one snapshot. Returns false when there is nothing to redo.
    pub fn redo(&mut self, document: &mut Document) -> bool {
        let Some(next) = self.redo_stack.pop_back() else {
            return false;
        };
        push_bounded(&mut self.undo_stack, Snapshot::capture(document), self.limit);
        next.restore_into(document);
        debug!(
            undo_depth = self.undo_stack.len(),
            redo_depth = self.redo_stack.len(),
            "redo applied"
        );
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

fn push_bounded(stack: &mut VecDeque<Snapshot>, snapshot: Snapshot, limit: usize) {
    stack.push_back(snapshot);
    while stack.len() > limit {
        stack.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Item, ItemId, Theme};

    fn doc_with(texts: &[&str]) -> Document {
        let mut doc = Document::fallback();
        for text in texts {
            doc.sections[0]
                .items
                .push(Item::new(ItemId::new(*text), *text));
        }
        doc
    }

    #[test]
    fn test_empty_history_is_noop() {
        let mut history = History::default();
        let mut doc = Document::fallback();
        assert!(!history.undo(&mut doc));
        assert!(!history.redo(&mut doc));
        assert_eq!(doc, Document::fallback());
    }

    #[test]
    fn test_undo_then_redo() {
        let mut history = History::default();
        let mut doc = doc_with(&[]);
        history.record(&doc);
        doc = doc_with(&["stove"]);

        assert!(history.undo(&mut doc));
        assert_eq!(doc, doc_with(&[]));
        assert!(history.can_redo());

        assert!(history.redo(&mut doc));
        assert_eq!(doc, doc_with(&["stove"]));
        assert!(!history.can_redo());
        assert!(history.can_undo());
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::default();
        let mut doc = doc_with(&[]);
        history.record(&doc);
        doc = doc_with(&["stove"]);
        history.undo(&mut doc);
        assert!(history.can_redo());

        history.record(&doc);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_limit_evicts_oldest() {
        let mut history = History::new(3);
        for i in 0..5 {
            history.record(&doc_with(&[&format!("item{i}")]));
        }
        assert_eq!(history.undo_len(), 3);

        let mut doc = Document::fallback();
        while history.undo(&mut doc) {}
        assert_eq!(doc, doc_with(&["item2"]));
    }

    #[test]
    fn test_theme_is_not_restored() {
        let mut history = History::default();
        let mut doc = Document::fallback();
        history.record(&doc);
        doc.theme = Theme::Dark;
        doc.sections.clear();

        history.undo(&mut doc);
        assert_eq!(doc.theme, Theme::Dark);
        assert_eq!(doc.sections.len(), 1);
    }

    #[test]
    fn test_zero_limit_is_raised_to_one() {
        assert_eq!(History::new(0).limit(), 1);
    }
}
