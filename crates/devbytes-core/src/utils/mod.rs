//! Utility functions for string formatting.

pub mod format;

pub use format::{format_date, smart_truncate, truncate_string};
