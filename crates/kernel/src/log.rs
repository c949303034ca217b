use core::fmt;

macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Info, format_args!($($arg)*));
    };
}

macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log::log($crate::log::LogLevel::Error, format_args!($($arg)*));
    };
}

pub(crate) use {error, info};

pub fn log(level: LogLevel, message: fmt::Arguments) {
    crate::println!("{} {}", LevelFormat(level), message);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Info,
    Error,
}

struct LevelFormat(LogLevel);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (color, msg) = match self.0 {
            LogLevel::Info => (32, " INFO"),
            LogLevel::Error => (31, "ERROR"),
        };
        write!(f, "\x1B[{color};1m{msg}\x1B[0m")
    }
}
