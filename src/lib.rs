// Library interface for the markup index and incremental build state

pub mod build;
pub mod config;
pub mod error;
pub mod model;

pub use config::Config;
pub use error::MarkupError;
pub use model::document::{DocumentView, TextChange, TextDocument};
pub use model::highlighter::{HighlighterHandle, HighlighterInfo, TargetArea, TextAttributes};
pub use model::markup_model::MarkupModel;
