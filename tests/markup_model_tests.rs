// Integration tests for the highlighter index through its public API

use markup_index::model::document::{DocumentView, TextDocument};
use markup_index::model::highlighter::{Color, TargetArea, TextAttributes};
use markup_index::model::listener::MarkupEvent;
use markup_index::{MarkupError, MarkupModel};
use std::sync::{Arc, Mutex};

/// 100 bytes: line 0 is [0, 44), line 1 is [45, 60), line 2 is [61, 100)
fn hundred_byte_document() -> TextDocument {
    let text = format!("{}\n{}\n{}", "x".repeat(44), "y".repeat(15), "z".repeat(39));
    TextDocument::new(text)
}

fn red() -> TextAttributes {
    TextAttributes::background(Color(255, 0, 0))
}

#[test]
fn test_exact_and_line_highlighters_merge_in_offset_order() {
    let mut model = MarkupModel::new(hundred_byte_document());
    assert_eq!(model.document().text_length(), 100);

    let exact = model
        .add_range_highlighter(10, 20, 0, red(), TargetArea::ExactRange)
        .unwrap();
    let line = model
        .add_range_highlighter(45, 60, 0, red(), TargetArea::LinesInRange)
        .unwrap();

    let hits: Vec<_> = model
        .overlapping_iter(15, 55)
        .map(|info| (info.id(), info.range()))
        .collect();
    assert_eq!(hits, vec![(exact.id(), 10..20), (line.id(), 45..60)]);

    assert_eq!(model.overlapping_iter(21, 44).count(), 0);
}

#[test]
fn test_line_highlighter_reached_from_anywhere_on_its_line() {
    let mut model = MarkupModel::new(hundred_byte_document());
    let line = model.add_line_highlighter(2, 0, red()).unwrap();
    assert_eq!(model.range(line), Some(61..61));

    for (start, end) in [(61, 62), (70, 75), (99, 100), (100, 100)] {
        let ids: Vec<_> = model.overlapping_iter(start, end).map(|i| i.id()).collect();
        assert_eq!(ids, vec![line.id()], "window {}..{}", start, end);
    }
    assert_eq!(model.overlapping_iter(45, 60).count(), 0);
}

#[test]
fn test_line_number_bounds() {
    let mut model = MarkupModel::new(hundred_byte_document());
    let err = model.add_line_highlighter(3, 0, red()).unwrap_err();
    assert_eq!(
        err,
        MarkupError::LineOutOfBounds {
            line: 3,
            line_count: 3
        }
    );
    assert_eq!(err.to_string(), "lineNumber:3. Must be in [0, 2]");
    assert!(model.add_persistent_line_highlighter(3, 0, red()).is_none());
    assert!(model.is_empty());
}

#[test]
fn test_removed_handle_stays_invalid() {
    let mut model = MarkupModel::new(hundred_byte_document());
    let handle = model
        .add_range_highlighter(0, 10, 0, red(), TargetArea::ExactRange)
        .unwrap();
    assert!(model.remove_highlighter(handle));

    // Reusing the freed slot must not revive the old handle
    let other = model
        .add_range_highlighter(0, 10, 0, red(), TargetArea::ExactRange)
        .unwrap();
    assert!(!model.is_valid(handle));
    assert!(model.is_valid(other));
    assert!(!model.remove_highlighter(handle));
    assert_eq!(model.len(), 1);
}

#[test]
fn test_listener_sees_highlighter_state_at_event_time() {
    let mut model = MarkupModel::new(hundred_byte_document());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = model.add_listener(Arc::new(move |event: &MarkupEvent| {
        let kind = match event {
            MarkupEvent::AfterAdded(_) => "added",
            MarkupEvent::BeforeRemoved(_) => "removed",
            MarkupEvent::AttributesChanged { .. } => "changed",
        };
        sink.lock()
            .unwrap()
            .push((kind, event.highlighter().range()));
    }));

    let handle = model
        .add_range_highlighter(30, 40, 0, red(), TargetArea::ExactRange)
        .unwrap();
    let change = model.document_mut().insert(0, "++").unwrap();
    model.document_changed(change);
    model.remove_highlighter(handle);
    subscription.unsubscribe();
    model
        .add_range_highlighter(0, 1, 0, red(), TargetArea::ExactRange)
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("added", 30..40), ("removed", 32..42)]
    );
}

#[test]
fn test_all_highlighters_reflects_edits() {
    let mut model = MarkupModel::new(hundred_byte_document());
    let handle = model
        .add_range_highlighter(50, 55, 0, red(), TargetArea::ExactRange)
        .unwrap();
    assert_eq!(model.all_highlighters()[0].range(), 50..55);

    let change = model.document_mut().delete(0..45).unwrap();
    model.document_changed(change);
    assert_eq!(model.all_highlighters()[0].range(), 5..10);
    assert_eq!(model.range(handle), Some(5..10));
}
