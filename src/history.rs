// ============================================================================
// HISTORY STORE: linear, branch-pruning list of committed image states
// ============================================================================
//
// Entries are full snapshots (buffers share their samples, so an entry costs a
// reference count, not a copy).  The cursor always indexes a valid entry; the
// store is never empty once constructed.
// ============================================================================

use std::collections::VecDeque;

use crate::canvas::ImageBuffer;
use crate::ops::Operator;

pub const DEFAULT_MAX_DEPTH: usize = 20;

/// A committed snapshot plus the operator that produced it (`None` for the
/// loaded or reset baseline).
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub image: ImageBuffer,
    pub operator: Option<Operator>,
}

impl HistoryEntry {
    pub fn description(&self) -> String {
        match &self.operator {
            Some(op) => op.to_string(),
            None => "Original".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HistoryStore {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    max_depth: usize,
}

impl HistoryStore {
    /// A store holding `initial` as its only entry. `max_depth` is raised to 1
    /// if smaller.
    pub fn new(initial: ImageBuffer, max_depth: usize) -> Self {
        let mut entries = VecDeque::with_capacity(max_depth.max(1));
        entries.push_back(HistoryEntry {
            image: initial,
            operator: None,
        });
        Self {
            entries,
            cursor: 0,
            max_depth: max_depth.max(1),
        }
    }

    /// Append a new entry after the cursor. Any redo branch is discarded and
    /// the oldest entry is evicted when the depth bound is exceeded.
    pub fn commit(&mut self, image: ImageBuffer, operator: Option<Operator>) -> &HistoryEntry {
        self.entries.truncate(self.cursor + 1);
        self.entries.push_back(HistoryEntry { image, operator });
        self.cursor = self.entries.len() - 1;
        while self.entries.len() > self.max_depth {
            self.entries.pop_front();
            self.cursor -= 1;
        }
        &self.entries[self.cursor]
    }

    /// Step back one entry; `None` when already at the oldest.
    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(&self.entries[self.cursor])
    }

    /// Step forward one entry; `None` when already at the newest.
    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(&self.entries[self.cursor])
    }

    /// Drop everything and make `image` the sole entry.
    pub fn reset(&mut self, image: ImageBuffer) {
        self.entries.clear();
        self.entries.push_back(HistoryEntry {
            image,
            operator: None,
        });
        self.cursor = 0;
    }

    pub fn current(&self) -> &HistoryEntry {
        &self.entries[self.cursor]
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Descriptions of all entries, oldest first.
    pub fn descriptions(&self) -> Vec<String> {
        self.entries.iter().map(HistoryEntry::description).collect()
    }

    /// Bytes held by distinct sample allocations across all entries.
    pub fn memory_usage(&self) -> usize {
        let mut total = 0;
        for (i, e) in self.entries.iter().enumerate() {
            let shared = self
                .entries
                .iter()
                .take(i)
                .any(|prev| prev.image.shares_samples_with(&e.image));
            if !shared {
                total += e.image.byte_size();
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ColorSpace;

    fn img(v: u8) -> ImageBuffer {
        ImageBuffer::filled(2, 2, ColorSpace::Bgr, v)
    }

    fn values(h: &HistoryStore) -> Vec<u8> {
        h.entries().map(|e| e.image.samples()[0]).collect()
    }

    #[test]
    fn commit_after_undo_prunes_redo_branch() {
        let mut h = HistoryStore::new(img(0), DEFAULT_MAX_DEPTH);
        h.reset(img(b'A'));
        h.commit(img(b'B'), None);
        h.commit(img(b'C'), None);
        h.undo();
        h.undo();
        h.commit(img(b'D'), Some(Operator::Sharpen));
        assert_eq!(values(&h), vec![b'A', b'D']);
        assert_eq!(h.cursor(), 1);
        assert!(!h.can_redo());
    }

    #[test]
    fn undo_and_redo_stop_at_the_ends() {
        let mut h = HistoryStore::new(img(1), DEFAULT_MAX_DEPTH);
        assert!(h.undo().is_none());
        assert!(h.redo().is_none());
        h.commit(img(2), None);
        assert_eq!(h.undo().map(|e| e.image.samples()[0]), Some(1));
        assert!(h.undo().is_none());
        assert_eq!(h.redo().map(|e| e.image.samples()[0]), Some(2));
        assert!(h.redo().is_none());
    }

    #[test]
    fn depth_bound_evicts_oldest() {
        let mut h = HistoryStore::new(img(0), 3);
        for v in 1..=5 {
            h.commit(img(v), None);
        }
        assert_eq!(values(&h), vec![3, 4, 5]);
        assert_eq!(h.cursor(), 2);
    }

    #[test]
    fn zero_depth_is_raised_to_one() {
        let mut h = HistoryStore::new(img(0), 0);
        h.commit(img(9), None);
        assert_eq!(h.len(), 1);
        assert!(!h.can_undo());
        assert_eq!(h.current().image.samples()[0], 9);
    }

    #[test]
    fn reset_leaves_single_entry() {
        let mut h = HistoryStore::new(img(0), 5);
        h.commit(img(1), None);
        h.commit(img(2), None);
        h.reset(img(7));
        assert_eq!(values(&h), vec![7]);
        assert!(!h.can_undo() && !h.can_redo());
    }

    #[test]
    fn memory_usage_counts_shared_samples_once() {
        let base = img(5);
        let mut h = HistoryStore::new(base.clone(), 5);
        h.commit(base.clone(), None);
        h.commit(img(6), None);
        assert_eq!(h.memory_usage(), 2 * base.byte_size());
    }

    #[test]
    fn descriptions_name_operators() {
        let mut h = HistoryStore::new(img(0), 5);
        h.commit(img(1), Some(Operator::Gamma { gamma: 2.0 }));
        assert_eq!(h.descriptions(), vec!["Original".to_string(), "gamma (2.00)".to_string()]);
    }
}
