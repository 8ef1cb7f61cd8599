//! Registry of range highlighters over one document.
//!
//! Exact-range highlighters and line highlighters live in two separate
//! interval trees. Line highlighters are queried with a window widened to full
//! lines, and [`MergingOverlapIter`] interleaves both trees' results.
//!
//! Every mutator takes `&mut self`, so the single-writer discipline is enforced
//! by the borrow checker; an overlap iterator borrows the model and therefore
//! cannot outlive a structural change.

use crate::config::{AllHighlightersOrder, MarkupConfig};
use crate::error::{MarkupError, Result};
use crate::model::document::{DocumentView, TextChange};
use crate::model::highlighter::{
    by_affected_start_offset, ChangeResult, HighlighterHandle, HighlighterId, HighlighterInfo,
    HighlighterStyle, RangeHighlighter, TargetArea, TextAttributes,
};
use crate::model::interval_tree::{Interval, IntervalHandle, IntervalTree};
use crate::model::listener::{ListenerList, MarkupEvent, MarkupModelListener, Subscription};
use crate::model::merge::MergingOverlapIter;
use std::cell::OnceCell;
use std::ops::Range;
use std::sync::Arc;

pub struct MarkupModel<D> {
    document: D,
    config: MarkupConfig,
    /// Highlighters with target area `ExactRange`
    exact_tree: IntervalTree<RangeHighlighter>,
    /// Highlighters with target area `LinesInRange`
    line_tree: IntervalTree<RangeHighlighter>,
    listeners: ListenerList,
    /// Flattened snapshot of both trees; reset on every mutation
    cached: OnceCell<Vec<HighlighterInfo>>,
}

impl<D: DocumentView> MarkupModel<D> {
    pub fn new(document: D) -> Self {
        Self::with_config(document, MarkupConfig::default())
    }

    pub fn with_config(document: D, config: MarkupConfig) -> Self {
        Self {
            document,
            config,
            exact_tree: IntervalTree::new(),
            line_tree: IntervalTree::new(),
            listeners: ListenerList::new(),
            cached: OnceCell::new(),
        }
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Mutable access to the document. Call [`MarkupModel::document_changed`]
    /// after every edit made through it.
    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn config(&self) -> &MarkupConfig {
        &self.config
    }

    /// Total number of live highlighters
    pub fn len(&self) -> usize {
        self.exact_tree.len() + self.line_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Adding =====

    pub fn add_range_highlighter(
        &mut self,
        start: usize,
        end: usize,
        layer: i32,
        attributes: TextAttributes,
        target_area: TargetArea,
    ) -> Result<HighlighterHandle> {
        self.add_range_highlighter_and_change_attributes(
            start,
            end,
            layer,
            attributes,
            target_area,
            false,
            |_| {},
        )
    }

    /// Add a highlighter and let `change` adjust its style before listeners
    /// hear about it. No attribute-change event is fired for `change`.
    ///
    /// A persistent highlighter is anchored to the line containing `start`:
    /// it is placed at that line's first non-space offset, `end` is ignored,
    /// and it follows the line across edits.
    #[allow(clippy::too_many_arguments)]
    pub fn add_range_highlighter_and_change_attributes<F>(
        &mut self,
        start: usize,
        end: usize,
        layer: i32,
        attributes: TextAttributes,
        target_area: TargetArea,
        persistent: bool,
        change: F,
    ) -> Result<HighlighterHandle>
    where
        F: FnOnce(&mut HighlighterStyle),
    {
        self.check_range(start, end)?;
        let interval = if persistent {
            let anchor = self.line_anchor(start);
            Interval::new(anchor, anchor)
        } else {
            Interval::new(start, end)
        };
        Ok(self.insert_highlighter(interval, layer, attributes, target_area, persistent, change))
    }

    /// Add a highlighter with explicit greedy edges
    #[allow(clippy::too_many_arguments)]
    pub fn add_range_highlighter_with_greedy(
        &mut self,
        start: usize,
        end: usize,
        greedy_to_left: bool,
        greedy_to_right: bool,
        layer: i32,
        attributes: TextAttributes,
        target_area: TargetArea,
    ) -> Result<HighlighterHandle> {
        self.check_range(start, end)?;
        let interval = Interval::new(start, end).with_greedy(greedy_to_left, greedy_to_right);
        Ok(self.insert_highlighter(interval, layer, attributes, target_area, false, |_| {}))
    }

    /// Highlight a whole line. Fails for a line outside `[0, line_count - 1]`.
    pub fn add_line_highlighter(
        &mut self,
        line: usize,
        layer: i32,
        attributes: TextAttributes,
    ) -> Result<HighlighterHandle> {
        let line_count = self.document.line_count();
        if line >= line_count {
            return Err(MarkupError::LineOutOfBounds { line, line_count });
        }

        let offset = self.document.first_non_space_offset(line);
        self.add_range_highlighter(offset, offset, layer, attributes, TargetArea::LinesInRange)
    }

    /// Best-effort variant of [`MarkupModel::add_line_highlighter`] that
    /// follows its line across edits. Returns `None` for an invalid line.
    pub fn add_persistent_line_highlighter(
        &mut self,
        line: usize,
        layer: i32,
        attributes: TextAttributes,
    ) -> Option<HighlighterHandle> {
        if line >= self.document.line_count() {
            tracing::debug!("Skipping persistent line highlighter for invalid line {}", line);
            return None;
        }

        let offset = self.document.first_non_space_offset(line);
        let interval = Interval::new(offset, offset);
        Some(self.insert_highlighter(
            interval,
            layer,
            attributes,
            TargetArea::LinesInRange,
            true,
            |_| {},
        ))
    }

    fn check_range(&self, start: usize, end: usize) -> Result<()> {
        let text_length = self.document.text_length();
        if start > end || end > text_length {
            return Err(MarkupError::InvalidRange {
                start,
                end,
                text_length,
            });
        }
        Ok(())
    }

    fn line_anchor(&self, offset: usize) -> usize {
        let line = self.document.line_number(offset);
        self.document.first_non_space_offset(line)
    }

    fn insert_highlighter<F>(
        &mut self,
        interval: Interval,
        layer: i32,
        attributes: TextAttributes,
        target_area: TargetArea,
        persistent: bool,
        change: F,
    ) -> HighlighterHandle
    where
        F: FnOnce(&mut HighlighterStyle),
    {
        let mut style = HighlighterStyle::new(attributes);
        change(&mut style);

        let id = HighlighterId::next();
        let record = RangeHighlighter {
            id,
            target_area,
            layer,
            persistent,
            style,
        };
        let slot = self.tree_mut(target_area).insert(interval, record);
        let handle = HighlighterHandle::new(id, target_area, slot);
        self.invalidate_cache();

        tracing::debug!(
            "Added highlighter {} {:?} at {:?} (layer {})",
            id,
            target_area,
            interval.range(),
            layer
        );

        if let Some(info) = self.info(handle) {
            self.listeners.fire(&MarkupEvent::AfterAdded(info));
        }
        handle
    }

    // ===== Removing =====

    /// Remove a highlighter. Returns `false` (and does nothing) if it was
    /// already removed.
    pub fn remove_highlighter(&mut self, handle: HighlighterHandle) -> bool {
        let Some(info) = self.info(handle) else {
            return false;
        };

        self.listeners.fire(&MarkupEvent::BeforeRemoved(info));
        self.invalidate_cache();
        let removed = self
            .tree_mut(handle.target_area())
            .remove(handle.slot())
            .is_some();
        if !removed {
            tracing::error!(
                "Highlighter {} was valid but its tree refused to remove it",
                handle.id()
            );
            debug_assert!(removed, "tree lost highlighter {}", handle.id());
        } else {
            tracing::debug!("Removed highlighter {}", handle.id());
        }
        removed
    }

    /// Remove every highlighter, firing a removal event for each
    pub fn remove_all_highlighters(&mut self) {
        let all = self.collect_all();
        for info in all {
            self.listeners.fire(&MarkupEvent::BeforeRemoved(info));
        }
        self.invalidate_cache();
        self.exact_tree.clear();
        self.line_tree.clear();
        tracing::debug!("Removed all highlighters");
    }

    // ===== Attributes =====

    /// Mutate a highlighter's style and notify listeners if anything changed
    pub fn change_attributes<F>(
        &mut self,
        handle: HighlighterHandle,
        mutator: F,
    ) -> Result<ChangeResult>
    where
        F: FnOnce(&mut HighlighterStyle),
    {
        let record = self
            .tree_mut(handle.target_area())
            .get_mut(handle.slot())
            .filter(|record| record.id == handle.id())
            .ok_or(MarkupError::InvalidHandle(handle.id()))?;

        let before = record.style.clone();
        mutator(&mut record.style);
        let result = ChangeResult::between(&before, &record.style);

        if result != ChangeResult::NotChanged {
            self.invalidate_cache();
            if let Some(info) = self.info(handle) {
                self.listeners.fire(&MarkupEvent::AttributesChanged {
                    highlighter: info,
                    renderers_changed: result == ChangeResult::RenderersChanged,
                });
            }
        }
        Ok(result)
    }

    pub fn set_range_highlighter_attributes(
        &mut self,
        handle: HighlighterHandle,
        attributes: TextAttributes,
    ) -> Result<ChangeResult> {
        self.change_attributes(handle, |style| style.attributes = attributes)
    }

    // ===== Reading =====

    pub fn is_valid(&self, handle: HighlighterHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: HighlighterHandle) -> Option<&RangeHighlighter> {
        self.tree(handle.target_area())
            .get(handle.slot())
            .filter(|record| record.id == handle.id())
    }

    pub fn range(&self, handle: HighlighterHandle) -> Option<Range<usize>> {
        self.get(handle)?;
        self.tree(handle.target_area())
            .interval(handle.slot())
            .map(|interval| interval.range())
    }

    pub fn info(&self, handle: HighlighterHandle) -> Option<HighlighterInfo> {
        let record = self.get(handle)?;
        let interval = self.tree(handle.target_area()).interval(handle.slot())?;
        Some(self.make_info(handle.slot(), &interval, record))
    }

    /// Flattened list of all highlighters, rebuilt lazily after mutations
    pub fn all_highlighters(&self) -> &[HighlighterInfo] {
        self.cached.get_or_init(|| self.collect_all())
    }

    fn collect_all(&self) -> Vec<HighlighterInfo> {
        let mut all = Vec::with_capacity(self.len());
        for tree in [&self.exact_tree, &self.line_tree] {
            all.extend(
                tree.iter()
                    .map(|(slot, interval, record)| self.make_info(slot, interval, record)),
            );
        }
        if self.config.all_highlighters_order == AllHighlightersOrder::Merged {
            all.sort_by(by_affected_start_offset);
        }
        all
    }

    /// Highlighters overlapping `[start, end)`, line highlighters matched
    /// against the window widened to full lines, ordered by affected start
    pub fn overlapping_iter(&self, start: usize, end: usize) -> MergingOverlapIter<'_, D> {
        let end = end.max(start);
        let (line_start, line_end) = self.round_to_line_boundaries(start, end);
        tracing::trace!(
            "Overlap query {}..{} (lines {}..{})",
            start,
            end,
            line_start,
            line_end
        );
        MergingOverlapIter::new(
            self,
            self.exact_tree.overlapping(start, end),
            self.line_tree.overlapping(line_start, line_end),
        )
    }

    /// Feed overlapping highlighters to `processor` until it returns `false`
    pub fn process_overlapping<F>(&self, start: usize, end: usize, mut processor: F) -> bool
    where
        F: FnMut(&HighlighterInfo) -> bool,
    {
        self.overlapping_iter(start, end).all(|info| processor(&info))
    }

    /// Feed highlighters NOT overlapping `[start, end)` to `processor`
    pub fn process_outside<F>(&self, start: usize, end: usize, mut processor: F) -> bool
    where
        F: FnMut(&HighlighterInfo) -> bool,
    {
        [&self.exact_tree, &self.line_tree].into_iter().all(|tree| {
            tree.process_overlapping_outside(start, end, |slot, interval, record| {
                processor(&self.make_info(slot, interval, record))
            })
        })
    }

    /// Whether another highlighter in the same tree covers exactly the same
    /// offsets as `handle` (the highlighter itself does not count)
    pub fn contains_highlighter(&self, handle: HighlighterHandle) -> bool {
        let Some(range) = self.range(handle) else {
            return false;
        };
        let completed = self.tree(handle.target_area()).process_overlapping(
            range.start,
            range.end,
            |_, interval, record| {
                !(record.id != handle.id() && interval.range() == range)
            },
        );
        !completed
    }

    // ===== Document changes =====

    /// Move highlighters to follow an edit that was already applied to the document
    pub fn document_changed(&mut self, change: TextChange) {
        let engulfed_exact = self.exact_tree.retarget(&change);
        let engulfed_lines = self.line_tree.retarget(&change);
        self.invalidate_cache();

        self.normalize_after_change(TargetArea::ExactRange);
        self.normalize_after_change(TargetArea::LinesInRange);

        let mut invalidated = 0;
        if self.config.invalidate_deleted_ranges {
            for (area, slots) in [
                (TargetArea::ExactRange, engulfed_exact),
                (TargetArea::LinesInRange, engulfed_lines),
            ] {
                for slot in slots {
                    let Some(record) = self.tree(area).get(slot) else {
                        continue;
                    };
                    if record.persistent {
                        continue;
                    }
                    let handle = HighlighterHandle::new(record.id, area, slot);
                    if self.remove_highlighter(handle) {
                        invalidated += 1;
                    }
                }
            }
        }

        tracing::debug!(
            "Document change {:?}: {} highlighters, {} invalidated",
            change,
            self.len(),
            invalidated
        );
    }

    /// Clamp intervals to the text and re-anchor persistent highlighters
    fn normalize_after_change(&mut self, area: TargetArea) {
        let text_length = self.document.text_length();
        let moves: Vec<(IntervalHandle, usize, usize)> = self
            .tree(area)
            .iter()
            .filter_map(|(slot, interval, record)| {
                let (start, end) = if record.persistent {
                    let anchor = self.line_anchor(interval.start);
                    (anchor, anchor)
                } else {
                    (
                        interval.start.min(text_length),
                        interval.end.min(text_length),
                    )
                };
                (start != interval.start || end != interval.end).then_some((slot, start, end))
            })
            .collect();

        let tree = self.tree_mut(area);
        for (slot, start, end) in moves {
            tree.set_range(slot, start, end);
        }
    }

    // ===== Listeners =====

    /// Register a listener for add/remove/attribute events. It stays
    /// registered until the returned subscription is dropped.
    pub fn add_listener(&self, listener: Arc<dyn MarkupModelListener>) -> Subscription {
        self.listeners.add(listener)
    }

    /// Consume the model and drop both trees
    pub fn dispose(self) {
        tracing::debug!("Disposing markup model with {} highlighters", self.len());
        self.exact_tree.dispose();
        self.line_tree.dispose();
    }

    // ===== Internals shared with the merge layer =====

    fn tree(&self, area: TargetArea) -> &IntervalTree<RangeHighlighter> {
        match area {
            TargetArea::ExactRange => &self.exact_tree,
            TargetArea::LinesInRange => &self.line_tree,
        }
    }

    fn tree_mut(&mut self, area: TargetArea) -> &mut IntervalTree<RangeHighlighter> {
        match area {
            TargetArea::ExactRange => &mut self.exact_tree,
            TargetArea::LinesInRange => &mut self.line_tree,
        }
    }

    fn invalidate_cache(&mut self) {
        self.cached.take();
    }

    pub(crate) fn make_info(
        &self,
        slot: IntervalHandle,
        interval: &Interval,
        record: &RangeHighlighter,
    ) -> HighlighterInfo {
        HighlighterInfo {
            handle: HighlighterHandle::new(record.id, record.target_area, slot),
            interval: *interval,
            affected_start: self.affected_start(record.target_area, interval.start),
            highlighter: record.clone(),
        }
    }

    fn affected_start(&self, area: TargetArea, start: usize) -> usize {
        match area {
            TargetArea::ExactRange => start,
            TargetArea::LinesInRange => {
                let line = self.document.line_number(start);
                self.document.line_start_offset(line)
            }
        }
    }

    /// Widen `[start, end)` to the start of its first line and the end of its last line
    pub(crate) fn round_to_line_boundaries(&self, start: usize, end: usize) -> (usize, usize) {
        let text_length = self.document.text_length();
        let line_start = if start == 0 {
            0
        } else if start > text_length {
            text_length
        } else {
            self.document
                .line_start_offset(self.document.line_number(start))
        };
        let line_end = if end == 0 {
            0
        } else if end >= text_length {
            text_length
        } else {
            self.document.line_end_offset(self.document.line_number(end))
        };
        (line_start, line_end)
    }
}

impl<D> std::fmt::Debug for MarkupModel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkupModel")
            .field("exact", &self.exact_tree.len())
            .field("lines", &self.line_tree.len())
            .field("listeners", &self.listeners)
            .finish()
    }
}
