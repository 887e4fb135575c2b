//! Error handling foundation for missionctl.
//!
//! Each crate owns its domain error enums and wraps them in
//! `rootcause::Report` as they cross layers. At the trigger-contract
//! boundary reports are flattened into plain strings, so nothing below
//! the contract has to know about the structured error shape.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Flattens a report into a single line suitable for structured error data.
///
/// Multi-line report renderings are joined with `"; "` and blank lines dropped.
#[must_use]
pub fn flatten_report<C>(report: &Report<C>) -> String
where
    Report<C>: std::fmt::Display,
{
    report
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}
