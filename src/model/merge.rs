//! Two-way merge of exact-range and line highlighter overlap results.

use crate::model::document::DocumentView;
use crate::model::highlighter::{by_affected_start_offset, HighlighterInfo, RangeHighlighter};
use crate::model::interval_tree::Overlapping;
use crate::model::markup_model::MarkupModel;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Yields highlighters from both trees ordered by affected start offset, then
/// by id.
///
/// Each tree yields in start order, which keeps affected start monotone. Only
/// the run of highlighters sharing the head's affected start is materialized
/// per tree, sorted by id.
pub struct MergingOverlapIter<'a, D> {
    exact: Source<'a, D>,
    lines: Source<'a, D>,
}

struct Source<'a, D> {
    model: &'a MarkupModel<D>,
    tree: Overlapping<'a, RangeHighlighter>,
    run: VecDeque<HighlighterInfo>,
    /// First highlighter past the current run
    pending: Option<HighlighterInfo>,
}

impl<'a, D: DocumentView> Source<'a, D> {
    fn new(model: &'a MarkupModel<D>, tree: Overlapping<'a, RangeHighlighter>) -> Self {
        let mut source = Self {
            model,
            tree,
            run: VecDeque::new(),
            pending: None,
        };
        source.refill();
        source
    }

    fn pull(&mut self) -> Option<HighlighterInfo> {
        let model = self.model;
        self.tree
            .next()
            .map(|(slot, interval, record)| model.make_info(slot, interval, record))
    }

    fn refill(&mut self) {
        if !self.run.is_empty() {
            return;
        }
        let Some(first) = self.pending.take().or_else(|| self.pull()) else {
            return;
        };
        let affected_start = first.affected_start;
        self.run.push_back(first);
        while let Some(info) = self.pull() {
            if info.affected_start != affected_start {
                self.pending = Some(info);
                break;
            }
            self.run.push_back(info);
        }
        self.run.make_contiguous().sort_by_key(|info| info.id());
    }

    fn head(&self) -> Option<&HighlighterInfo> {
        self.run.front()
    }

    fn pop(&mut self) -> Option<HighlighterInfo> {
        let next = self.run.pop_front();
        self.refill();
        next
    }
}

impl<'a, D: DocumentView> MergingOverlapIter<'a, D> {
    pub(crate) fn new(
        model: &'a MarkupModel<D>,
        exact: Overlapping<'a, RangeHighlighter>,
        lines: Overlapping<'a, RangeHighlighter>,
    ) -> Self {
        Self {
            exact: Source::new(model, exact),
            lines: Source::new(model, lines),
        }
    }

    /// Next highlighter without consuming it
    pub fn peek(&self) -> Option<&HighlighterInfo> {
        if self.line_goes_first() {
            self.lines.head()
        } else {
            self.exact.head()
        }
    }

    fn line_goes_first(&self) -> bool {
        match (self.exact.head(), self.lines.head()) {
            (Some(exact), Some(line)) => by_affected_start_offset(line, exact) == Ordering::Less,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

impl<'a, D: DocumentView> Iterator for MergingOverlapIter<'a, D> {
    type Item = HighlighterInfo;

    fn next(&mut self) -> Option<HighlighterInfo> {
        if self.line_goes_first() {
            self.lines.pop()
        } else {
            self.exact.pop()
        }
    }
}
