use core::fmt;

use ansi_term::{Color, WithFg};

use crate::global::Console;

macro_rules! log {
    ($console:expr, $level:expr, $($arg:tt)*) => {
        $crate::log::log($console, $level, format_args!($($arg)*))
    };
}

macro_rules! info {
    ($console:expr, $($arg:tt)*) => {
        log!($console, $crate::log::LogLevel::Info, $($arg)*)
    };
}

macro_rules! warn {
    ($console:expr, $($arg:tt)*) => {
        log!($console, $crate::log::LogLevel::Warn, $($arg)*)
    };
}

macro_rules! error {
    ($console:expr, $($arg:tt)*) => {
        log!($console, $crate::log::LogLevel::Error, $($arg)*)
    };
}

/// Writes one `[heap] LEVEL message` line.
///
/// Console write failures are ignored; there is nowhere left to report them.
pub(crate) fn log<C>(console: &mut C, level: LogLevel, message: fmt::Arguments)
where
    C: Console + ?Sized,
{
    let level = LevelFormat(level, console.supports_color());
    let _ = writeln!(console, "[heap] {level} {message}");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

struct LevelFormat(LogLevel, bool);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        };
        let msg = match self.0 {
            LogLevel::Info => " INFO",
            LogLevel::Warn => " WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", WithFg::maybe(self.1, color, msg))
    }
}
