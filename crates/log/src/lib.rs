//! Process-wide logging for the zend daemon.
//!
//! Records go to stderr as text or one JSON object per line. Debug output for
//! noisy subsystems is gated behind [`Category`] switches so that `-debug=sc`
//! style toggles keep working without raising the global level.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

mod sink;

pub use sink::{capture_snapshot, clear_captured_logs, enable_capture, CapturedLog};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Subsystems whose debug output can be switched on individually.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    Sc,
    Cert,
    Mempool,
    Reorg,
    Bench,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Sc,
        Category::Cert,
        Category::Mempool,
        Category::Reorg,
        Category::Bench,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sc => "sc",
            Self::Cert => "cert",
            Self::Mempool => "mempool",
            Self::Reorg => "reorg",
            Self::Bench => "bench",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|cat| cat.as_str() == raw)
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
    pub categories: Vec<Category>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
            categories: Vec::new(),
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_CATEGORIES: AtomicU32 = AtomicU32::new(0);

pub fn init(config: &LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
    let mask = config
        .categories
        .iter()
        .fold(0u32, |mask, cat| mask | cat.bit());
    LOG_CATEGORIES.store(mask, Ordering::Relaxed);
}

pub fn set_category(category: Category, on: bool) {
    if on {
        LOG_CATEGORIES.fetch_or(category.bit(), Ordering::Relaxed);
    } else {
        LOG_CATEGORIES.fetch_and(!category.bit(), Ordering::Relaxed);
    }
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Category records are emitted when the category is switched on, whatever
/// the global level, or when the global level already admits them.
pub fn category_enabled(category: Category, level: Level) -> bool {
    LOG_CATEGORIES.load(Ordering::Relaxed) & category.bit() != 0 || enabled(level)
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level) {
        return;
    }
    sink::emit(sink::Record {
        level,
        target,
        category: None,
        file,
        line,
        args,
    });
}

pub fn log_category(
    category: Category,
    level: Level,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !category_enabled(category, level) {
        return;
    }
    sink::emit(sink::Record {
        level,
        target: category.as_str(),
        category: Some(category),
        file,
        line,
        args,
    });
}

fn current_format() -> Format {
    match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => Format::Json,
        _ => Format::Text,
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

/// `log_cat!(Category::Sc, "scId={} added", id)` logs at debug level.
#[macro_export]
macro_rules! log_cat {
    ($cat:expr, $($arg:tt)*) => {{
        if $crate::category_enabled($cat, $crate::Level::Debug) {
            $crate::log_category($cat, $crate::Level::Debug, file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARNING"), Some(Level::Warn));
        assert_eq!(Level::parse("trace"), Some(Level::Trace));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn parse_format_and_category() {
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
        assert_eq!(Category::parse("SC"), Some(Category::Sc));
        assert_eq!(Category::parse("bench"), Some(Category::Bench));
        assert_eq!(Category::parse("net"), None);
    }

    #[test]
    fn category_switch_bypasses_level() {
        init(&LogConfig {
            level: Level::Warn,
            ..LogConfig::default()
        });
        assert!(!category_enabled(Category::Reorg, Level::Debug));
        set_category(Category::Reorg, true);
        assert!(category_enabled(Category::Reorg, Level::Debug));
        assert!(!category_enabled(Category::Sc, Level::Debug));
        set_category(Category::Reorg, false);
    }
}
