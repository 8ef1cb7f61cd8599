use crate::model::interval_tree::{Interval, IntervalHandle};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Stable identity of a highlighter, distinguishing otherwise-equal ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HighlighterId(pub u64);

impl HighlighterId {
    /// Generate a new process-unique id
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for HighlighterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hl_{}", self.0)
    }
}

/// Which part of the text a highlighter decorates; selects the owning tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetArea {
    /// Exactly the characters in the range
    ExactRange,
    /// Every full line touched by the range
    LinesInRange,
}

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub u8, pub u8, pub u8);

/// Decoration drawn with `effect_color`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    #[default]
    None,
    LineUnderscore,
    WaveUnderscore,
    BoldLineUnderscore,
    BoldDottedLine,
    StrikeOut,
    Boxed,
    RoundedBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    #[default]
    Plain,
    Bold,
    Italic,
    BoldItalic,
}

/// Display styling of a highlighter. Opaque to the index apart from change detection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextAttributes {
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    pub effect_color: Option<Color>,
    pub effect_type: EffectType,
    pub font_style: FontStyle,
    pub error_stripe_color: Option<Color>,
}

impl TextAttributes {
    pub fn background(color: Color) -> Self {
        Self {
            background: Some(color),
            ..Self::default()
        }
    }

    pub fn underline(color: Color, effect_type: EffectType) -> Self {
        Self {
            effect_color: Some(color),
            effect_type,
            ..Self::default()
        }
    }
}

/// Placement of a separator line drawn by a line highlighter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorPlacement {
    Top,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSeparator {
    pub color: Color,
    pub placement: SeparatorPlacement,
}

/// Mutable presentation state of a highlighter.
///
/// `gutter_icon` and `line_separator` are renderers; changing them is reported
/// as [`ChangeResult::RenderersChanged`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlighterStyle {
    pub attributes: TextAttributes,
    pub error_stripe_tooltip: Option<String>,
    pub thin_error_stripe: bool,
    pub gutter_icon: Option<String>,
    pub line_separator: Option<LineSeparator>,
}

impl HighlighterStyle {
    pub fn new(attributes: TextAttributes) -> Self {
        Self {
            attributes,
            ..Self::default()
        }
    }

    fn renderers_differ(&self, other: &Self) -> bool {
        self.gutter_icon != other.gutter_icon || self.line_separator != other.line_separator
    }
}

/// Outcome of an attribute mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeResult {
    NotChanged,
    AttributesChanged,
    RenderersChanged,
}

impl ChangeResult {
    /// Classify the difference between two styles
    pub fn between(before: &HighlighterStyle, after: &HighlighterStyle) -> Self {
        if before.renderers_differ(after) {
            ChangeResult::RenderersChanged
        } else if before != after {
            ChangeResult::AttributesChanged
        } else {
            ChangeResult::NotChanged
        }
    }
}

/// Record stored in the interval tree for each highlighter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeHighlighter {
    pub id: HighlighterId,
    pub target_area: TargetArea,
    /// Draw/query priority among overlapping highlighters (higher = on top)
    pub layer: i32,
    /// Anchored to a line rather than to offsets; follows its line across edits
    pub persistent: bool,
    pub style: HighlighterStyle,
}

/// What callers hold on to. Cheap to copy; becomes invalid once the
/// highlighter is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HighlighterHandle {
    id: HighlighterId,
    target_area: TargetArea,
    slot: IntervalHandle,
}

impl HighlighterHandle {
    pub(crate) fn new(id: HighlighterId, target_area: TargetArea, slot: IntervalHandle) -> Self {
        Self {
            id,
            target_area,
            slot,
        }
    }

    pub fn id(&self) -> HighlighterId {
        self.id
    }

    pub fn target_area(&self) -> TargetArea {
        self.target_area
    }

    pub(crate) fn slot(&self) -> IntervalHandle {
        self.slot
    }
}

/// Owned snapshot of a highlighter as seen by listeners and queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlighterInfo {
    pub handle: HighlighterHandle,
    pub interval: Interval,
    /// Start of the text this highlighter visually affects: the range start for
    /// exact-range highlighters, the start of the first line otherwise
    pub affected_start: usize,
    pub highlighter: RangeHighlighter,
}

impl HighlighterInfo {
    pub fn id(&self) -> HighlighterId {
        self.highlighter.id
    }

    pub fn range(&self) -> Range<usize> {
        self.interval.range()
    }

    pub fn layer(&self) -> i32 {
        self.highlighter.layer
    }
}

/// Order by affected start offset, then by id
pub fn by_affected_start_offset(a: &HighlighterInfo, b: &HighlighterInfo) -> Ordering {
    a.affected_start
        .cmp(&b.affected_start)
        .then_with(|| a.id().cmp(&b.id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let a = HighlighterId::next();
        let b = HighlighterId::next();
        assert!(a < b);
        assert_eq!(format!("{}", HighlighterId(7)), "hl_7");
    }

    #[test]
    fn test_change_result_classification() {
        let base = HighlighterStyle::new(TextAttributes::background(Color(1, 2, 3)));

        assert_eq!(ChangeResult::between(&base, &base), ChangeResult::NotChanged);

        let mut recolored = base.clone();
        recolored.attributes.foreground = Some(Color(9, 9, 9));
        assert_eq!(
            ChangeResult::between(&base, &recolored),
            ChangeResult::AttributesChanged
        );

        let mut tooltip = base.clone();
        tooltip.error_stripe_tooltip = Some("unused".to_string());
        assert_eq!(
            ChangeResult::between(&base, &tooltip),
            ChangeResult::AttributesChanged
        );

        // Renderer changes win even when attributes changed too
        let mut both = recolored.clone();
        both.gutter_icon = Some("breakpoint".to_string());
        assert_eq!(
            ChangeResult::between(&base, &both),
            ChangeResult::RenderersChanged
        );
    }

    #[test]
    fn test_attributes_deserialize_with_defaults() {
        let attrs: TextAttributes =
            serde_json::from_str(r#"{"background":[10,20,30],"effect_type":"wave_underscore"}"#)
                .unwrap();
        assert_eq!(attrs.background, Some(Color(10, 20, 30)));
        assert_eq!(attrs.effect_type, EffectType::WaveUnderscore);
        assert_eq!(attrs.font_style, FontStyle::Plain);
    }
}
