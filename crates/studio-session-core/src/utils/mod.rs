//! Utility functions for formatting durations and messages.

pub mod format;

pub use format::{format_countdown, truncate_string};
