use crate::model::highlighter::HighlighterId;

/// Usage errors raised by the markup model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupError {
    /// Offsets do not satisfy `start <= end <= text_length`
    InvalidRange {
        start: usize,
        end: usize,
        text_length: usize,
    },
    /// Line number outside `[0, line_count - 1]`
    LineOutOfBounds { line: usize, line_count: usize },
    /// The highlighter was already removed
    InvalidHandle(HighlighterId),
}

impl std::fmt::Display for MarkupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRange {
                start,
                end,
                text_length,
            } => write!(
                f,
                "invalid range {}..{} (text length {})",
                start, end, text_length
            ),
            Self::LineOutOfBounds { line, line_count } => write!(
                f,
                "lineNumber:{}. Must be in [0, {}]",
                line,
                line_count.saturating_sub(1)
            ),
            Self::InvalidHandle(id) => write!(f, "highlighter {} is no longer valid", id),
        }
    }
}

impl std::error::Error for MarkupError {}

pub type Result<T> = std::result::Result<T, MarkupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_out_of_bounds_message() {
        let err = MarkupError::LineOutOfBounds {
            line: 7,
            line_count: 3,
        };
        assert_eq!(err.to_string(), "lineNumber:7. Must be in [0, 2]");
    }

    #[test]
    fn test_invalid_range_message() {
        let err = MarkupError::InvalidRange {
            start: 10,
            end: 5,
            text_length: 20,
        };
        assert_eq!(err.to_string(), "invalid range 10..5 (text length 20)");
    }
}
