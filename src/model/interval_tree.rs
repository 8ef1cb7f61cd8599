//! Augmented AVL interval tree backing the markup model.
//!
//! Nodes live in a slab and link to each other by `u32` index, so a node is
//! shared between "the tree" and "the caller's handle" without reference
//! counting. A handle pairs the slab index with the slot's generation; freeing
//! a slot bumps the generation, which is how stale handles are detected.
//!
//! Each node caches the maximum *effective* end of its subtree. The effective
//! end of an empty interval is `end + 1`, so zero-length intervals (caret-like
//! line highlighters) can still be found by overlap queries.

use crate::model::document::TextChange;
use std::cmp::max;
use std::ops::Range;

/// Half-open offset range `[start, end)` with edge behavior for edits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
    /// Text inserted exactly at `start` becomes part of the interval
    pub greedy_to_left: bool,
    /// Text inserted exactly at `end` becomes part of the interval
    pub greedy_to_right: bool,
}

impl Interval {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "interval start {} > end {}", start, end);
        Self {
            start,
            end,
            greedy_to_left: false,
            greedy_to_right: false,
        }
    }

    pub fn with_greedy(mut self, greedy_to_left: bool, greedy_to_right: bool) -> Self {
        self.greedy_to_left = greedy_to_left;
        self.greedy_to_right = greedy_to_right;
        self
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn effective_end(&self) -> usize {
        effective_end(self.start, self.end)
    }

    /// Whether this interval intersects the window `[start, end)`.
    ///
    /// Empty ranges behave like points: an empty interval at `p` overlaps when
    /// `start <= p < end`, an empty window at `q` overlaps when the interval
    /// contains `q`, and two empty ranges overlap when they coincide.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < effective_end(start, end) && start < self.effective_end()
    }

    /// Position of this interval after `change` has been applied to the text
    pub fn retargeted(&self, change: &TextChange) -> Interval {
        let TextChange {
            offset,
            old_len,
            new_len,
        } = *change;
        let old_end = change.old_end();
        let insertion = old_len == 0;

        let start = if self.start < offset {
            self.start
        } else if insertion && self.start == offset {
            if self.greedy_to_left {
                offset
            } else {
                offset + new_len
            }
        } else if self.start >= old_end {
            self.start - old_len + new_len
        } else {
            offset
        };

        let end = if self.end < offset || (self.end == offset && !insertion) {
            self.end
        } else if insertion && self.end == offset {
            if self.greedy_to_right {
                offset + new_len
            } else {
                offset
            }
        } else if self.end >= old_end {
            self.end - old_len + new_len
        } else if self.greedy_to_right {
            offset + new_len
        } else {
            offset
        };

        Interval {
            start,
            end: max(start, end),
            greedy_to_left: self.greedy_to_left,
            greedy_to_right: self.greedy_to_right,
        }
    }
}

fn effective_end(start: usize, end: usize) -> usize {
    if start == end {
        end + 1
    } else {
        end
    }
}

/// Stable reference to one interval stored in an [`IntervalTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Node<T> {
    interval: Interval,
    /// Insertion sequence; breaks ties between equal starts
    seq: u64,
    value: T,
    height: i32,
    /// Maximum effective end in this subtree
    max_end: usize,
    left: Option<u32>,
    right: Option<u32>,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Interval tree keyed by `(start, insertion order)`
#[derive(Debug)]
pub struct IntervalTree<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    root: Option<u32>,
    len: usize,
    next_seq: u64,
}

impl<T> Default for IntervalTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---
// Public API
// ---

impl<T> IntervalTree<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert an interval. Performance: O(log n)
    pub fn insert(&mut self, interval: Interval, value: T) -> IntervalHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        let node = Node {
            interval,
            seq,
            value,
            height: 1,
            max_end: interval.effective_end(),
            left: None,
            right: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        };

        self.root = Some(self.insert_at(self.root, index));
        self.len += 1;
        self.handle_of(index)
    }

    /// Remove an interval. Returns `None` if the handle is stale.
    /// Performance: O(log n)
    pub fn remove(&mut self, handle: IntervalHandle) -> Option<T> {
        let index = self.resolve(handle)?;
        let key = self.key(index);
        self.root = self.detach(self.root, key);
        self.len -= 1;
        self.release(index).map(|node| node.value)
    }

    pub fn contains(&self, handle: IntervalHandle) -> bool {
        self.resolve(handle).is_some()
    }

    pub fn get(&self, handle: IntervalHandle) -> Option<&T> {
        self.resolve(handle).map(|index| &self.node(index).value)
    }

    pub fn get_mut(&mut self, handle: IntervalHandle) -> Option<&mut T> {
        let index = self.resolve(handle)?;
        Some(&mut self.node_mut(index).value)
    }

    pub fn interval(&self, handle: IntervalHandle) -> Option<Interval> {
        self.resolve(handle).map(|index| self.node(index).interval)
    }

    /// Move one interval to new offsets, keeping its handle and greedy flags
    pub fn set_range(&mut self, handle: IntervalHandle, start: usize, end: usize) -> bool {
        debug_assert!(start <= end);
        let Some(index) = self.resolve(handle) else {
            return false;
        };
        let key = self.key(index);
        self.root = self.detach(self.root, key);

        let node = self.node_mut(index);
        node.interval.start = start;
        node.interval.end = end;
        node.left = None;
        node.right = None;
        node.height = 1;
        node.max_end = node.interval.effective_end();

        self.root = Some(self.insert_at(self.root, index));
        true
    }

    /// Remove everything and invalidate every outstanding handle. O(n)
    pub fn clear(&mut self) {
        for index in 0..self.slots.len() as u32 {
            if self.slots[index as usize].node.is_some() {
                self.release(index);
            }
        }
        self.root = None;
        self.len = 0;
    }

    /// Consume the tree. Any use afterwards is rejected at compile time.
    pub fn dispose(self) {
        tracing::trace!("Disposing interval tree with {} intervals", self.len);
    }

    /// Lazily iterate intervals overlapping `[start, end)` in ascending start order
    pub fn overlapping(&self, start: usize, end: usize) -> Overlapping<'_, T> {
        let mut iter = Overlapping {
            tree: self,
            stack: Vec::new(),
            start,
            end,
            window_end: effective_end(start, end),
        };
        iter.push_left(self.root);
        iter
    }

    /// Iterate every interval in ascending start order
    pub fn iter(&self) -> Iter<'_, T> {
        let mut iter = Iter {
            tree: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    /// Feed overlapping intervals to `visitor` until it returns `false`.
    /// Returns `false` if the visitor stopped early.
    pub fn process_overlapping<F>(&self, start: usize, end: usize, mut visitor: F) -> bool
    where
        F: FnMut(IntervalHandle, &Interval, &T) -> bool,
    {
        self.overlapping(start, end)
            .all(|(handle, interval, value)| visitor(handle, interval, value))
    }

    /// Feed intervals that do NOT overlap `[start, end)` to `visitor`
    pub fn process_overlapping_outside<F>(&self, start: usize, end: usize, mut visitor: F) -> bool
    where
        F: FnMut(IntervalHandle, &Interval, &T) -> bool,
    {
        self.iter()
            .filter(|(_, interval, _)| !interval.overlaps(start, end))
            .all(|(handle, interval, value)| visitor(handle, interval, value))
    }

    /// Recompute every interval for a text edit and rebuild the tree.
    ///
    /// Returns the intervals whose non-empty range lay entirely inside the
    /// replaced region. They are kept (collapsed or resized); whether to drop
    /// them is up to the caller.
    pub fn retarget(&mut self, change: &TextChange) -> Vec<IntervalHandle> {
        let mut engulfed = Vec::new();
        let mut live = Vec::with_capacity(self.len);

        for index in 0..self.slots.len() as u32 {
            let Some(node) = self.slots[index as usize].node.as_mut() else {
                continue;
            };
            let old = node.interval;
            node.interval = old.retargeted(change);
            if change.old_len > 0
                && !old.is_empty()
                && old.start >= change.offset
                && old.end <= change.old_end()
            {
                engulfed.push(index);
            }
            live.push(index);
        }

        // Edits preserve start order except among ties, but greedy flags can
        // split former ties apart, so re-sort before relinking.
        live.sort_by_key(|&index| self.key(index));
        self.root = self.build_balanced(&live);

        engulfed
            .into_iter()
            .map(|index| self.handle_of(index))
            .collect()
    }
}

// ---
// Node bookkeeping
// ---

impl<T> IntervalTree<T> {
    fn node(&self, index: u32) -> &Node<T> {
        match &self.slots[index as usize].node {
            Some(node) => node,
            None => unreachable!("tree links to vacant slot {}", index),
        }
    }

    fn node_mut(&mut self, index: u32) -> &mut Node<T> {
        match &mut self.slots[index as usize].node {
            Some(node) => node,
            None => unreachable!("tree links to vacant slot {}", index),
        }
    }

    fn resolve(&self, handle: IntervalHandle) -> Option<u32> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.generation == handle.generation && slot.node.is_some()).then_some(handle.index)
    }

    fn handle_of(&self, index: u32) -> IntervalHandle {
        IntervalHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Vacate a slot and invalidate handles pointing at it
    fn release(&mut self, index: u32) -> Option<Node<T>> {
        let slot = &mut self.slots[index as usize];
        let node = slot.node.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        node
    }

    fn key(&self, index: u32) -> (usize, u64) {
        let node = self.node(index);
        (node.interval.start, node.seq)
    }

    fn height(&self, index: Option<u32>) -> i32 {
        index.map_or(0, |i| self.node(i).height)
    }

    fn max_end(&self, index: Option<u32>) -> usize {
        index.map_or(0, |i| self.node(i).max_end)
    }

    fn balance_factor(&self, index: u32) -> i32 {
        let node = self.node(index);
        self.height(node.left) - self.height(node.right)
    }

    fn update_stats(&mut self, index: u32) {
        let (left, right, own_end) = {
            let node = self.node(index);
            (node.left, node.right, node.interval.effective_end())
        };
        let height = 1 + max(self.height(left), self.height(right));
        let max_end = max(own_end, max(self.max_end(left), self.max_end(right)));
        let node = self.node_mut(index);
        node.height = height;
        node.max_end = max_end;
    }
}

// ---
// Recursive structure changes
// ---

impl<T> IntervalTree<T> {
    fn insert_at(&mut self, root: Option<u32>, index: u32) -> u32 {
        let Some(root) = root else {
            return index;
        };

        if self.key(index) < self.key(root) {
            let left = self.node(root).left;
            let new_left = self.insert_at(left, index);
            self.node_mut(root).left = Some(new_left);
        } else {
            let right = self.node(root).right;
            let new_right = self.insert_at(right, index);
            self.node_mut(root).right = Some(new_right);
        }

        self.balance(root)
    }

    /// Unlink the node with `key` from the subtree at `root`; the slot stays occupied
    fn detach(&mut self, root: Option<u32>, key: (usize, u64)) -> Option<u32> {
        let root = root?;
        let root_key = self.key(root);

        if key < root_key {
            let left = self.node(root).left;
            let new_left = self.detach(left, key);
            self.node_mut(root).left = new_left;
        } else if key > root_key {
            let right = self.node(root).right;
            let new_right = self.detach(right, key);
            self.node_mut(root).right = new_right;
        } else {
            let (left, right) = {
                let node = self.node(root);
                (node.left, node.right)
            };
            return match (left, right) {
                (None, child) | (child, None) => child,
                (Some(left), Some(right)) => {
                    let (new_right, successor) = self.detach_min(right);
                    let node = self.node_mut(successor);
                    node.left = Some(left);
                    node.right = new_right;
                    Some(self.balance(successor))
                }
            };
        }

        Some(self.balance(root))
    }

    /// Unlink the leftmost node; returns (new subtree root, detached node)
    fn detach_min(&mut self, root: u32) -> (Option<u32>, u32) {
        match self.node(root).left {
            None => (self.node(root).right, root),
            Some(left) => {
                let (new_left, min) = self.detach_min(left);
                self.node_mut(root).left = new_left;
                (Some(self.balance(root)), min)
            }
        }
    }

    fn build_balanced(&mut self, sorted: &[u32]) -> Option<u32> {
        if sorted.is_empty() {
            return None;
        }
        let mid = sorted.len() / 2;
        let index = sorted[mid];
        let left = self.build_balanced(&sorted[..mid]);
        let right = self.build_balanced(&sorted[mid + 1..]);
        let node = self.node_mut(index);
        node.left = left;
        node.right = right;
        self.update_stats(index);
        Some(index)
    }

    // --- AVL Balancing ---

    fn balance(&mut self, index: u32) -> u32 {
        self.update_stats(index);
        let bf = self.balance_factor(index);

        if bf > 1 {
            if let Some(left) = self.node(index).left {
                if self.balance_factor(left) < 0 {
                    let new_left = self.rotate_left(left);
                    self.node_mut(index).left = Some(new_left);
                }
            }
            self.rotate_right(index)
        } else if bf < -1 {
            if let Some(right) = self.node(index).right {
                if self.balance_factor(right) > 0 {
                    let new_right = self.rotate_right(right);
                    self.node_mut(index).right = Some(new_right);
                }
            }
            self.rotate_left(index)
        } else {
            index
        }
    }

    fn rotate_left(&mut self, index: u32) -> u32 {
        let Some(pivot) = self.node(index).right else {
            return index;
        };
        let pivot_left = self.node(pivot).left;
        self.node_mut(index).right = pivot_left;
        self.node_mut(pivot).left = Some(index);
        self.update_stats(index);
        self.update_stats(pivot);
        pivot
    }

    fn rotate_right(&mut self, index: u32) -> u32 {
        let Some(pivot) = self.node(index).left else {
            return index;
        };
        let pivot_right = self.node(pivot).right;
        self.node_mut(index).left = pivot_right;
        self.node_mut(pivot).right = Some(index);
        self.update_stats(index);
        self.update_stats(pivot);
        pivot
    }
}

// ---
// Iterators
// ---

/// In-order iterator over intervals overlapping a window, pruning subtrees
/// whose maximum end lies before the window
pub struct Overlapping<'a, T> {
    tree: &'a IntervalTree<T>,
    stack: Vec<u32>,
    start: usize,
    end: usize,
    /// Effective window end; nothing starting at or after it can overlap
    window_end: usize,
}

impl<'a, T> Overlapping<'a, T> {
    fn push_left(&mut self, mut index: Option<u32>) {
        while let Some(i) = index {
            let node = self.tree.node(i);
            if node.max_end <= self.start {
                break;
            }
            self.stack.push(i);
            index = node.left;
        }
    }
}

impl<'a, T> Iterator for Overlapping<'a, T> {
    type Item = (IntervalHandle, &'a Interval, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(index) = self.stack.pop() {
            let tree = self.tree;
            let node = tree.node(index);
            if node.interval.start >= self.window_end {
                // Everything after this in order starts even later
                self.stack.clear();
                return None;
            }
            self.push_left(node.right);
            if node.interval.overlaps(self.start, self.end) {
                return Some((tree.handle_of(index), &node.interval, &node.value));
            }
        }
        None
    }
}

/// In-order iterator over every interval
pub struct Iter<'a, T> {
    tree: &'a IntervalTree<T>,
    stack: Vec<u32>,
}

impl<'a, T> Iter<'a, T> {
    fn push_left(&mut self, mut index: Option<u32>) {
        while let Some(i) = index {
            self.stack.push(i);
            index = self.tree.node(i).left;
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (IntervalHandle, &'a Interval, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.stack.pop()?;
        let tree = self.tree;
        let node = tree.node(index);
        self.push_left(node.right);
        Some((tree.handle_of(index), &node.interval, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.stack.len(), Some(self.tree.len))
    }
}

#[cfg(test)]
impl<T> IntervalTree<T> {
    /// Verify ordering, balance and augmentation; returns the node count
    fn check_invariants(&self) -> usize {
        fn walk<T>(
            tree: &IntervalTree<T>,
            index: Option<u32>,
            lower: Option<(usize, u64)>,
            upper: Option<(usize, u64)>,
        ) -> (i32, usize, usize) {
            let Some(i) = index else {
                return (0, 0, 0);
            };
            let node = tree.node(i);
            let key = tree.key(i);
            assert!(lower.map_or(true, |l| l < key), "BST order violated");
            assert!(upper.map_or(true, |u| key < u), "BST order violated");
            assert!(node.interval.start <= node.interval.end);
            let (hl, ml, cl) = walk(tree, node.left, lower, Some(key));
            let (hr, mr, cr) = walk(tree, node.right, Some(key), upper);
            assert!((hl - hr).abs() <= 1, "AVL balance violated");
            assert_eq!(node.height, 1 + hl.max(hr), "stale height");
            let expected_max = node.interval.effective_end().max(ml).max(mr);
            assert_eq!(node.max_end, expected_max, "stale max_end");
            (node.height, node.max_end, 1 + cl + cr)
        }
        let (_, _, count) = walk(self, self.root, None, None);
        assert_eq!(count, self.len, "len out of sync with tree");
        count
    }
}
