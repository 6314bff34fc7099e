//! Versioned copy-on-write cells
//!
//! Heap objects, threads, and static areas all live in a [`CowVec`]: a vector of optional
//! reference-counted cells. Cells are shared (not copied) between live state and the saved
//! pre-images of earlier states. The first write to a cell since the last [`CowVec::seal`]
//! records its pre-image in the journal and clones it; later writes in the same step go straight
//! to the clone.
//!
//! Sealing hands back the journal as a [`CowDiff`] and resets the dirty flags. Undoing a diff
//! plugs the pre-images back in and restores the length the vector had, which restores the state
//! as it was when the diff started.

use std::rc::Rc;

/// Pre-images of the cells written since some point
#[derive(Debug)]
pub struct CowDiff<T> {
    entries: Vec<(usize, Option<Rc<T>>)>,

    /// Length of the vector when the diff started
    len_before: usize,
}

impl<T> CowDiff<T> {
    pub fn new() -> CowDiff<T> {
        CowDiff {
            entries: vec![],
            len_before: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append a later diff (whose entries must be undone first)
    ///
    /// The combined diff keeps the starting length of `self`.
    pub fn append(&mut self, mut later: CowDiff<T>) {
        self.entries.append(&mut later.entries);
    }
}

impl<T> Default for CowDiff<T> {
    fn default() -> CowDiff<T> {
        CowDiff::new()
    }
}

/// Vector of copy-on-write cells, some of which may be empty
#[derive(Debug)]
pub struct CowVec<T> {
    cells: Vec<Option<Rc<T>>>,

    /// Cells whose pre-image is already in the journal
    dirty: Vec<bool>,

    /// Pre-images of cells written since the last seal
    journal: Vec<(usize, Option<Rc<T>>)>,

    /// Length as of the last seal
    sealed_len: usize,
}

impl<T: Clone> CowVec<T> {
    pub fn new() -> CowVec<T> {
        CowVec {
            cells: vec![],
            dirty: vec![],
            journal: vec![],
            sealed_len: 0,
        }
    }

    /// Length, including empty cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.cells.get(idx).and_then(Option::as_deref)
    }

    /// Shared cell (for checking that unchanged cells are not copied)
    pub fn get_shared(&self, idx: usize) -> Option<&Rc<T>> {
        self.cells.get(idx).and_then(Option::as_ref)
    }

    pub fn contains(&self, idx: usize) -> bool {
        self.get(idx).is_some()
    }

    /// Mutable access to a cell, cloning it on the first write since the last seal
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        if !self.contains(idx) {
            return None;
        }
        self.record(idx);
        self.cells[idx].as_mut().map(Rc::make_mut)
    }

    /// Put a value in a cell, growing the vector if needed
    pub fn set(&mut self, idx: usize, value: T) {
        if idx >= self.cells.len() {
            self.cells.resize(idx + 1, None);
            self.dirty.resize(idx + 1, false);
        }
        self.record(idx);
        self.cells[idx] = Some(Rc::new(value));
    }

    /// Put a value in the first empty cell, returning its index
    pub fn insert(&mut self, value: T) -> usize {
        let idx = self
            .cells
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.cells.len());
        self.set(idx, value);
        idx
    }

    /// Append a value after the last cell, returning its index
    pub fn push(&mut self, value: T) -> usize {
        let idx = self.cells.len();
        self.set(idx, value);
        idx
    }

    /// Empty a cell
    pub fn remove(&mut self, idx: usize) -> Option<Rc<T>> {
        if !self.contains(idx) {
            return None;
        }
        self.record(idx);
        self.cells[idx].take()
    }

    /// Occupied cells with their indices, in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| cell.as_deref().map(|value| (idx, value)))
    }

    /// Number of occupied cells
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Has anything been written since the last seal?
    pub fn is_dirty(&self) -> bool {
        !self.journal.is_empty()
    }

    /// Take the journal of pre-images and start a fresh one
    pub fn seal(&mut self) -> CowDiff<T> {
        for (idx, _) in &self.journal {
            self.dirty[*idx] = false;
        }
        let len_before = std::mem::replace(&mut self.sealed_len, self.cells.len());
        CowDiff {
            entries: std::mem::take(&mut self.journal),
            len_before,
        }
    }

    /// Restore the pre-images of a diff
    ///
    /// The live journal must be empty (sealed) first, since it would otherwise refer to cells
    /// that no longer exist. Empty cells at the end are kept as long as they were there when the
    /// diff started, since older diffs may still have pre-images for them.
    pub fn undo(&mut self, diff: CowDiff<T>) {
        debug_assert!(self.journal.is_empty(), "undo with unsealed writes");
        for (idx, pre_image) in diff.entries.into_iter().rev() {
            if idx >= self.cells.len() {
                self.cells.resize(idx + 1, None);
            }
            self.cells[idx] = pre_image;
        }
        self.cells.resize(diff.len_before, None);
        self.dirty.clear();
        self.dirty.resize(self.cells.len(), false);
        self.sealed_len = self.cells.len();
    }

    fn record(&mut self, idx: usize) {
        if !self.dirty[idx] {
            self.dirty[idx] = true;
            self.journal.push((idx, self.cells[idx].clone()));
        }
    }
}

impl<T: Clone> Default for CowVec<T> {
    fn default() -> CowVec<T> {
        CowVec::new()
    }
}

impl<T: Clone> Clone for CowVec<T> {
    /// Cheap clone sharing every cell (the journal is not carried over)
    fn clone(&self) -> CowVec<T> {
        CowVec {
            cells: self.cells.clone(),
            dirty: vec![false; self.cells.len()],
            journal: vec![],
            sealed_len: self.cells.len(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_write_copies_later_writes_reuse() {
        let mut cells: CowVec<Vec<u8>> = CowVec::new();
        cells.push(vec![1]);
        cells.push(vec![2]);
        let _ = cells.seal();

        let before = Rc::clone(cells.get_shared(0).unwrap());
        cells.get_mut(0).unwrap().push(10);
        let after_first = Rc::as_ptr(cells.get_shared(0).unwrap());
        cells.get_mut(0).unwrap().push(11);
        let after_second = Rc::as_ptr(cells.get_shared(0).unwrap());

        assert_eq!(*before, vec![1], "pre-image is untouched");
        assert_ne!(Rc::as_ptr(&before), after_first, "first write copies");
        assert_eq!(after_first, after_second, "second write reuses the copy");
        assert_eq!(cells.get(0), Some(&vec![1, 10, 11]));

        let diff = cells.seal();
        assert_eq!(diff.len(), 1, "one pre-image per written cell");
    }

    #[test]
    fn untouched_cells_stay_shared() {
        let mut cells: CowVec<String> = CowVec::new();
        cells.push(String::from("a"));
        cells.push(String::from("b"));
        let _ = cells.seal();
        let snapshot = cells.clone();

        cells.get_mut(1).unwrap().push('!');
        assert!(Rc::ptr_eq(
            cells.get_shared(0).unwrap(),
            snapshot.get_shared(0).unwrap()
        ));
        assert!(!Rc::ptr_eq(
            cells.get_shared(1).unwrap(),
            snapshot.get_shared(1).unwrap()
        ));
        assert_eq!(snapshot.get(1).map(String::as_str), Some("b"));
    }

    #[test]
    fn undo_restores_inserts_removes_and_writes() {
        let mut cells: CowVec<u32> = CowVec::new();
        cells.push(1);
        cells.push(2);
        cells.push(3);
        let _ = cells.seal();

        *cells.get_mut(0).unwrap() = 100;
        cells.remove(1);
        assert_eq!(cells.insert(20), 1, "insert reuses the first hole");
        cells.push(4);
        cells.push(5);
        let diff = cells.seal();

        cells.undo(diff);
        assert_eq!(cells.iter().map(|(_, v)| *v).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(cells.len(), 3, "trailing cells added since are dropped");
        assert!(!cells.is_dirty());

        // After undoing, writes are tracked again
        *cells.get_mut(2).unwrap() = 30;
        assert!(cells.is_dirty());
    }

    #[test]
    fn nested_diffs_undo_in_order() {
        let mut cells: CowVec<u32> = CowVec::new();
        cells.push(0);
        let _ = cells.seal();

        *cells.get_mut(0).unwrap() = 1;
        let mut first = cells.seal();
        *cells.get_mut(0).unwrap() = 2;
        let second = cells.seal();
        first.append(second);

        cells.undo(first);
        assert_eq!(cells.get(0), Some(&0));
    }

    #[test]
    fn undo_keeps_cells_older_diffs_refer_to() {
        let mut cells: CowVec<u32> = CowVec::new();
        cells.push(0);
        let first = cells.seal();

        // A cell appended and emptied again in the same step
        cells.push(1);
        cells.remove(1);
        let second = cells.seal();
        let third = cells.seal();
        assert!(third.is_empty());

        cells.undo(third);
        assert_eq!(cells.len(), 2);
        cells.undo(second);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells.get(0), Some(&0));
        cells.undo(first);
        assert!(cells.is_empty());
    }

    #[test]
    fn undo_after_trailing_removal() {
        let mut cells: CowVec<u32> = CowVec::new();
        cells.push(0);
        cells.push(1);
        let _ = cells.seal();

        cells.remove(1);
        let freed = cells.seal();
        *cells.get_mut(0).unwrap() = 5;
        let written = cells.seal();

        cells.undo(written);
        assert_eq!(cells.get(0), Some(&0));
        cells.undo(freed);
        assert_eq!(cells.get(1), Some(&1));
        assert_eq!(cells.count(), 2);
    }
}
