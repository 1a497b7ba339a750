//! Sliding-window aggregation buffer
//!
//! One stash exists per (shard, processor). Documents are merged by
//! `(window, tag)`, where the window is the document timestamp aligned down to
//! a multiple of `window_size` seconds.
//!
//! ```text
//!          rejected   |  trailing  |        current window        | advances
//!        -------------+------------+------------------------------+---------->
//!                start - margin   start                  start + window_size
//! ```
//!
//! - Documents older than `start - window_move_margin` are rejected.
//! - Documents between `start - window_move_margin` and `start` are kept
//!   under their own (trailing) window timestamp.
//! - A document at or beyond `start + window_size` advances the window. A
//!   non-empty stash first reports overflow so the closing window is flushed.
//!
//! Capacity: `docs_in_buffer` bounds live entries; reaching it reports
//! overflow. `varied_doc_limit` bounds distinct tags between two clears; a new
//! tag beyond it is rejected.

use crate::document::{Document, Tag};
use ahash::AHashMap;

enum Placement {
    Merged,
    Inserted,
    Rejected,
    /// Stash must be flushed before this document can be placed
    Full(Document),
}

pub struct SlidingStash {
    docs_in_buffer: usize,
    varied_doc_limit: usize,
    window_size: u32,
    window_move_margin: u32,

    window_start: Option<u32>,
    docs: Vec<Document>,
    /// Tag -> (window timestamp, index into `docs`) for every window held
    index: AHashMap<Tag, Vec<(u32, usize)>>,
}

impl SlidingStash {
    /// Zero limits or window size are raised to one
    pub fn new(
        docs_in_buffer: usize,
        varied_doc_limit: usize,
        window_size: u32,
        window_move_margin: u32,
    ) -> Self {
        let docs_in_buffer = docs_in_buffer.max(1);
        SlidingStash {
            docs_in_buffer,
            varied_doc_limit: varied_doc_limit.max(1),
            window_size: window_size.max(1),
            window_move_margin,
            window_start: None,
            docs: Vec::with_capacity(docs_in_buffer.min(4096)),
            index: AHashMap::new(),
        }
    }

    /// Merge or insert `docs`, returning the unplaced remainder and the
    /// number of rejected documents.
    ///
    /// A `Some` remainder means the stash is full or the window has to move:
    /// the caller flushes (see [`drain`](Self::drain)) and adds the remainder
    /// again. Every flush empties the stash, so at least one document is
    /// placed per round and the loop terminates.
    pub fn add(&mut self, docs: Vec<Document>) -> (Option<Vec<Document>>, u64) {
        let mut rejected = 0u64;
        let mut iter = docs.into_iter();
        while let Some(doc) = iter.next() {
            match self.place(doc) {
                Placement::Merged | Placement::Inserted => {}
                Placement::Rejected => rejected += 1,
                Placement::Full(doc) => {
                    let mut rest = Vec::with_capacity(iter.len() + 1);
                    rest.push(doc);
                    rest.extend(iter);
                    return (Some(rest), rejected);
                }
            }
        }
        (None, rejected)
    }

    /// Currently held documents; the stash is left untouched
    #[inline]
    pub fn dump(&self) -> &[Document] {
        &self.docs
    }

    /// Empty the stash; the window position is kept
    pub fn clear(&mut self) {
        self.docs.clear();
        self.index.clear();
    }

    /// Take every held document and clear
    pub fn drain(&mut self) -> Vec<Document> {
        self.index.clear();
        std::mem::take(&mut self.docs)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Distinct tags held since the last clear
    #[inline]
    pub fn varied_count(&self) -> usize {
        self.index.len()
    }

    /// Start of the current window, once the first document arrived
    #[inline]
    pub fn window_start(&self) -> Option<u32> {
        self.window_start
    }

    #[inline]
    fn align(&self, timestamp: u32) -> u32 {
        timestamp - timestamp % self.window_size
    }

    fn place(&mut self, mut doc: Document) -> Placement {
        let window = self.align(doc.timestamp);
        let start = *self.window_start.get_or_insert(window);

        if doc.timestamp < start.saturating_sub(self.window_move_margin) {
            return Placement::Rejected;
        }
        if doc.timestamp >= start.saturating_add(self.window_size) {
            if !self.docs.is_empty() {
                return Placement::Full(doc);
            }
            self.window_start = Some(window);
        }

        let known_tag = match self.index.get(&doc.tag) {
            Some(entries) => {
                if let Some(&(_, i)) = entries.iter().find(|(w, _)| *w == window) {
                    self.docs[i].meter.merge(&doc.meter);
                    return Placement::Merged;
                }
                true
            }
            None => false,
        };

        if self.docs.len() >= self.docs_in_buffer {
            return Placement::Full(doc);
        }
        if !known_tag && self.index.len() >= self.varied_doc_limit {
            return Placement::Rejected;
        }

        doc.timestamp = window;
        let slot = self.docs.len();
        self.index
            .entry(doc.tag.clone())
            .or_default()
            .push((window, slot));
        self.docs.push(doc);
        Placement::Inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Meter, TagValue};

    const T0: u32 = 1_700_000_040; // multiple of 60

    fn doc(timestamp: u32, key: u64, packets: u64) -> Document {
        Document::new(
            timestamp,
            Tag::new().with("key", key),
            Meter::new().sum("packet", packets).max("max_len", packets * 10),
        )
    }

    fn packets_of(stash: &SlidingStash, key: u64) -> Vec<u64> {
        stash
            .dump()
            .iter()
            .filter(|d| d.tag == Tag::new().with("key", key))
            .filter_map(|d| d.meter.get("packet"))
            .collect()
    }

    #[test]
    fn test_merges_within_window() {
        let mut stash = SlidingStash::new(16, 16, 60, 10);

        let (rest, rejected) = stash.add(vec![doc(T0, 1, 1), doc(T0 + 5, 2, 1), doc(T0 + 30, 1, 4)]);
        assert!(rest.is_none());
        assert_eq!(rejected, 0);

        assert_eq!(stash.len(), 2);
        assert_eq!(packets_of(&stash, 1), vec![5]);
        assert_eq!(packets_of(&stash, 2), vec![1]);
        assert!(stash.dump().iter().all(|d| d.timestamp == T0));
    }

    #[test]
    fn test_arrival_order_does_not_change_result() {
        let docs: Vec<Document> = (0..30).map(|i| doc(T0 + i as u32, i % 4, i + 1)).collect();
        let mut reversed = docs.clone();
        reversed.reverse();

        let mut a = SlidingStash::new(64, 64, 60, 10);
        let mut b = SlidingStash::new(64, 64, 60, 10);
        assert!(a.add(docs).0.is_none());
        assert!(b.add(reversed).0.is_none());

        for key in 0..4 {
            assert_eq!(packets_of(&a, key), packets_of(&b, key));
            let max_a = a.dump().iter().find(|d| d.tag.get("key") == Some(&TagValue::Uint(key)));
            let max_b = b.dump().iter().find(|d| d.tag.get("key") == Some(&TagValue::Uint(key)));
            assert_eq!(
                max_a.map(|d| d.meter.get("max_len")),
                max_b.map(|d| d.meter.get("max_len"))
            );
        }
    }

    #[test]
    fn test_dump_clear_dump_is_empty() {
        let mut stash = SlidingStash::new(8, 8, 60, 10);
        stash.add(vec![doc(T0, 1, 1), doc(T0, 2, 1)]);
        assert_eq!(stash.dump().len(), 2);
        assert_eq!(stash.dump().len(), 2, "dump does not clear");

        stash.clear();
        assert!(stash.dump().is_empty());
        assert_eq!(stash.varied_count(), 0);
        assert_eq!(stash.window_start(), Some(T0));
    }

    #[test]
    fn test_drain_takes_contents() {
        let mut stash = SlidingStash::new(8, 8, 60, 10);
        stash.add(vec![doc(T0, 1, 1), doc(T0, 2, 1)]);

        let drained = stash.drain();
        assert_eq!(drained.len(), 2);
        assert!(stash.is_empty());

        stash.add(vec![doc(T0, 1, 3)]);
        assert_eq!(packets_of(&stash, 1), vec![3], "index was reset by drain");
    }

    #[test]
    fn test_too_late_is_rejected() {
        let mut stash = SlidingStash::new(8, 8, 60, 10);
        stash.add(vec![doc(T0, 1, 1)]);

        let (rest, rejected) = stash.add(vec![doc(T0 - 11, 1, 1), doc(T0 - 60 - 10, 2, 1)]);
        assert!(rest.is_none());
        assert_eq!(rejected, 2);
        assert_eq!(packets_of(&stash, 1), vec![1], "late documents never merge");
        assert!(packets_of(&stash, 2).is_empty());
    }

    #[test]
    fn test_late_within_margin_goes_to_trailing_window() {
        let mut stash = SlidingStash::new(8, 8, 60, 10);
        stash.add(vec![doc(T0 + 1, 1, 1)]);

        let (rest, rejected) = stash.add(vec![doc(T0 - 10, 1, 2), doc(T0 - 3, 1, 3)]);
        assert!(rest.is_none());
        assert_eq!(rejected, 0);

        let trailing: Vec<&Document> = stash
            .dump()
            .iter()
            .filter(|d| d.timestamp == T0 - 60)
            .collect();
        assert_eq!(trailing.len(), 1);
        assert_eq!(trailing[0].meter.get("packet"), Some(5));
        assert_eq!(stash.varied_count(), 1, "same tag in two windows counts once");
    }

    #[test]
    fn test_window_advance_flushes_closing_window() {
        let mut stash = SlidingStash::new(8, 8, 60, 10);
        stash.add(vec![doc(T0, 1, 1)]);

        let next = T0 + 60;
        let (rest, rejected) = stash.add(vec![doc(next + 2, 1, 1), doc(next + 3, 2, 1)]);
        assert_eq!(rejected, 0);
        let rest = rest.expect("window advance needs a flush");
        assert_eq!(rest.len(), 2);
        assert_eq!(stash.window_start(), Some(T0));

        let flushed = stash.drain();
        assert_eq!(flushed.len(), 1);

        let (rest, _) = stash.add(rest);
        assert!(rest.is_none());
        assert_eq!(stash.window_start(), Some(next));
        assert!(stash.dump().iter().all(|d| d.timestamp == next));
    }

    #[test]
    fn test_varied_limit_rejects_exactly_the_excess() {
        let mut stash = SlidingStash::new(100, 5, 60, 10);
        let docs: Vec<Document> = (0..8).map(|k| doc(T0, k, 1)).collect();

        let (rest, rejected) = stash.add(docs);
        assert!(rest.is_none());
        assert_eq!(rejected, 3);
        assert_eq!(stash.len(), 5);

        // Known tags still merge after the limit is reached
        let (_, rejected) = stash.add(vec![doc(T0, 0, 9)]);
        assert_eq!(rejected, 0);
        assert_eq!(packets_of(&stash, 0), vec![10]);
        for key in 5..8 {
            assert!(packets_of(&stash, key).is_empty());
        }
    }

    #[test]
    fn test_capacity_overflow_loop_terminates() {
        let mut stash = SlidingStash::new(4, 100, 60, 10);
        let mut pending: Vec<Document> = (0..10).map(|k| doc(T0, k, 1)).collect();
        let mut batches = Vec::new();

        let mut rounds = 0;
        loop {
            let (rest, rejected) = stash.add(pending);
            assert_eq!(rejected, 0);
            match rest {
                None => break,
                Some(rest) => {
                    batches.push(stash.drain());
                    pending = rest;
                }
            }
            rounds += 1;
            assert!(rounds <= 10, "each flush must make progress");
        }
        batches.push(stash.drain());

        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_full_stash_still_merges_known_keys() {
        let mut stash = SlidingStash::new(2, 100, 60, 10);
        stash.add(vec![doc(T0, 1, 1), doc(T0, 2, 1)]);

        let (rest, _) = stash.add(vec![doc(T0, 2, 1)]);
        assert!(rest.is_none());
        assert_eq!(packets_of(&stash, 2), vec![2]);

        let (rest, _) = stash.add(vec![doc(T0, 3, 1)]);
        assert_eq!(rest.map(|r| r.len()), Some(1));
    }
}
