// Property-based tests using proptest
// These tests generate random sequences of operations and cross-check the
// highlighter index against a linear scan

use markup_index::model::document::{DocumentView, TextDocument};
use markup_index::model::highlighter::{
    Color, HighlighterHandle, HighlighterInfo, TargetArea, TextAttributes,
};
use markup_index::MarkupModel;
use proptest::prelude::*;
use std::collections::HashSet;

/// Random operations against the model
#[derive(Debug, Clone)]
enum ModelOp {
    AddExact(usize, usize),
    AddLines(usize, usize),
    AddLine(usize),
    AddPersistentLine(usize),
    Remove(usize),
    Edit(usize, usize, String),
}

/// Strategy for generating random model operations
fn model_op_strategy() -> impl Strategy<Value = ModelOp> {
    prop_oneof![
        4 => (0usize..200, 0usize..30).prop_map(|(s, l)| ModelOp::AddExact(s, l)),
        2 => (0usize..200, 0usize..30).prop_map(|(s, l)| ModelOp::AddLines(s, l)),
        1 => (0usize..12).prop_map(ModelOp::AddLine),
        1 => (0usize..12).prop_map(ModelOp::AddPersistentLine),
        2 => (0usize..64).prop_map(ModelOp::Remove),
        2 => (0usize..200, 0usize..15, "[a-z \n]{0,10}")
            .prop_map(|(o, d, t)| ModelOp::Edit(o, d, t)),
    ]
}

fn attrs() -> TextAttributes {
    TextAttributes::background(Color(1, 2, 3))
}

/// Apply `op`, clamping generated offsets into the current text
fn apply(model: &mut MarkupModel<TextDocument>, handles: &mut Vec<HighlighterHandle>, op: &ModelOp) {
    let len = model.document().text_length();
    match op {
        ModelOp::AddExact(start, extra) | ModelOp::AddLines(start, extra) => {
            let start = start % (len + 1);
            let end = (start + extra).min(len);
            let area = if matches!(op, ModelOp::AddExact(..)) {
                TargetArea::ExactRange
            } else {
                TargetArea::LinesInRange
            };
            handles.push(
                model
                    .add_range_highlighter(start, end, 0, attrs(), area)
                    .unwrap(),
            );
        }
        ModelOp::AddLine(line) => {
            let line = line % model.document().line_count();
            handles.push(model.add_line_highlighter(line, 0, attrs()).unwrap());
        }
        ModelOp::AddPersistentLine(line) => {
            let line = line % model.document().line_count();
            handles.extend(model.add_persistent_line_highlighter(line, 0, attrs()));
        }
        ModelOp::Remove(i) => {
            if !handles.is_empty() {
                let handle = handles.remove(i % handles.len());
                assert!(model.remove_highlighter(handle));
                assert!(!model.is_valid(handle));
                assert!(!model.remove_highlighter(handle));
            }
        }
        ModelOp::Edit(offset, deleted, text) => {
            let offset = offset % (len + 1);
            let end = (offset + deleted).min(len);
            let change = model.document_mut().replace(offset..end, text).unwrap();
            model.document_changed(change);
            handles.retain(|h| model.is_valid(*h));
        }
    }
}

/// Window a line highlighter is matched against
fn line_window(doc: &TextDocument, start: usize, end: usize) -> (usize, usize) {
    let len = doc.text_length();
    let line_start = if start == 0 {
        0
    } else if start > len {
        len
    } else {
        doc.line_start_offset(doc.line_number(start))
    };
    let line_end = if end == 0 {
        0
    } else if end >= len {
        len
    } else {
        doc.line_end_offset(doc.line_number(end))
    };
    (line_start, line_end)
}

fn brute_force_overlaps(
    model: &MarkupModel<TextDocument>,
    start: usize,
    end: usize,
) -> HashSet<HighlighterHandle> {
    let (line_start, line_end) = line_window(model.document(), start, end);
    model
        .all_highlighters()
        .iter()
        .filter(|info| match info.handle.target_area() {
            TargetArea::ExactRange => info.interval.overlaps(start, end),
            TargetArea::LinesInRange => info.interval.overlaps(line_start, line_end),
        })
        .map(|info| info.handle)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    /// The cached array always equals the live highlighters, without duplicates
    #[test]
    fn prop_all_highlighters_matches_live_set(
        ops in prop::collection::vec(model_op_strategy(), 1..60),
    ) {
        let text = "fn main() {\n    let x = 1;\n\n    println!(\"{}\", x);\n}\n".repeat(3);
        let mut model = MarkupModel::new(TextDocument::new(text));
        let mut handles = Vec::new();

        for op in &ops {
            apply(&mut model, &mut handles, op);

            let cached: Vec<HighlighterHandle> =
                model.all_highlighters().iter().map(|info| info.handle).collect();
            let unique: HashSet<_> = cached.iter().copied().collect();
            prop_assert_eq!(unique.len(), cached.len());
            prop_assert_eq!(cached.len(), model.len());

            let live: HashSet<_> = handles.iter().copied().collect();
            prop_assert_eq!(unique, live);

            let len = model.document().text_length();
            for info in model.all_highlighters() {
                prop_assert!(info.interval.start <= info.interval.end);
                prop_assert!(info.interval.end <= len);
            }
        }
    }

    /// Overlap queries agree with a linear scan, ordered by affected start then id
    #[test]
    fn prop_overlap_query_matches_linear_scan(
        ops in prop::collection::vec(model_op_strategy(), 1..60),
        windows in prop::collection::vec((0usize..220, 0usize..40), 1..8),
    ) {
        let text = "alpha beta\n  gamma\n\ndelta epsilon zeta\n".repeat(4);
        let mut model = MarkupModel::new(TextDocument::new(text));
        let mut handles = Vec::new();
        for op in &ops {
            apply(&mut model, &mut handles, op);
        }

        for &(start, len) in &windows {
            let end = start + len;
            let hits: Vec<HighlighterInfo> = model.overlapping_iter(start, end).collect();
            let found: HashSet<_> = hits.iter().map(|info| info.handle).collect();
            prop_assert_eq!(found.len(), hits.len(), "duplicate hits");
            prop_assert_eq!(found, brute_force_overlaps(&model, start, end));
            let keys: Vec<_> = hits.iter().map(|info| (info.affected_start, info.id())).collect();
            prop_assert!(keys.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {:?}", keys);
        }
    }
}
