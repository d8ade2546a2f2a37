#![feature(error_generic_member_access)]
#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::{
    error::{self, Error},
    fmt,
};

use ansi_term::{Color, WithFg};
use snafu::GenerateImplicitData;

/// Source location captured implicitly when an error is built.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Multi-line rendering of an error and its source chain.
///
/// Each level prints its message and, when the error provides one, the
/// [`Location`] where it was raised.
pub struct Report<E> {
    error: E,
    color: bool,
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = self.color;
        writeln!(f, "Error: {}", WithFg::maybe(color, Color::Red, &self.error))?;
        if let Some(loc) = error::request_ref::<Location>(&self.error) {
            writeln!(f, "  at {}", WithFg::maybe(color, Color::DarkGray, loc))?;
        }
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {}", WithFg::maybe(color, Color::Red, s))?;
            if let Some(loc) = error::request_ref::<Location>(s) {
                writeln!(f, "      at {}", WithFg::maybe(color, Color::DarkGray, loc))?;
            }
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error, color: true }
    }

    /// Enables or disables ANSI colors in the output.
    #[must_use]
    pub fn colored(mut self, color: bool) -> Self {
        self.color = color;
        self
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use snafu::{ResultExt as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("inner failure"))]
    #[snafu(provide(ref, priority, Location => location))]
    struct InnerError {
        #[snafu(implicit)]
        location: Location,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("outer failure"))]
    #[snafu(provide(ref, priority, Location => location))]
    struct OuterError {
        source: InnerError,
        #[snafu(implicit)]
        location: Location,
    }

    fn failing() -> Result<(), OuterError> {
        InnerSnafu.fail().context(OuterSnafu)
    }

    #[test]
    fn test_report_plain() {
        let err = failing().unwrap_err();
        let report = Report::new(err).colored(false).to_string();
        let lines: Vec<_> = report.lines().collect();

        assert_eq!(lines[0], "Error: outer failure");
        assert!(lines[1].starts_with("  at ") && lines[1].contains("lib.rs"));
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "Caused by:");
        assert_eq!(lines[4], "   0: inner failure");
        assert!(lines[5].starts_with("      at "));
        assert!(!report.contains('\x1B'));
    }

    #[test]
    fn test_report_colored() {
        let err = failing().unwrap_err();
        let report = Report::new(err).to_string();
        assert!(report.starts_with("Error: \x1B[31;1mouter failure\x1B[0m"));
    }
}
