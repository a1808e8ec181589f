//! Output formatting
//!
//! Renders run reports and aggregates for the terminal or files.

mod formatter;

pub use formatter::{write_reports_to_file, OutputFormat, ResultFormatter};
