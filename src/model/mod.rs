//! Highlighter index over a text document

pub mod document;
pub mod highlighter;
pub mod interval_tree;
pub mod listener;
pub mod markup_model;
pub mod merge;
