use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

use crate::{current_format, Category, Format, Level, LOG_TIMESTAMPS};

pub(crate) struct Record<'a> {
    pub level: Level,
    pub target: &'static str,
    pub category: Option<Category>,
    pub file: &'static str,
    pub line: u32,
    pub args: fmt::Arguments<'a>,
}

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub category: Option<Category>,
    pub msg: String,
}

static CAPTURE_ENABLED: AtomicBool = AtomicBool::new(false);
static CAPTURE_CAPACITY: AtomicUsize = AtomicUsize::new(0);
static CAPTURE: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

/// Keeps the most recent `capacity` records in memory; zero turns capture off.
pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        CAPTURE_ENABLED.store(false, Ordering::Relaxed);
        return;
    }
    CAPTURE_CAPACITY.store(capacity, Ordering::Relaxed);
    CAPTURE.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(1024))));
    CAPTURE_ENABLED.store(true, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    if let Some(Ok(mut guard)) = CAPTURE.get().map(|buf| buf.lock()) {
        guard.clear();
    }
}

pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(Ok(guard)) = CAPTURE.get().map(|buf| buf.lock()) else {
        return Vec::new();
    };
    let start = guard.len().saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

pub(crate) fn emit(record: Record<'_>) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let capture = CAPTURE_ENABLED.load(Ordering::Relaxed);
    let format = current_format();
    let msg = if capture || format == Format::Json {
        Some(record.args.to_string())
    } else {
        None
    };

    let mut out = io::stderr().lock();
    match format {
        Format::Text => {
            if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                let _ = write!(out, "{} ", Timestamp(now));
            }
            let _ = writeln!(
                out,
                "{} {}: {}",
                record.level.as_str(),
                record.target,
                record.args
            );
        }
        Format::Json => {
            let mut fields = Map::new();
            fields.insert("ts_ms".into(), json!(ts_ms));
            fields.insert("level".into(), json!(record.level.as_str()));
            fields.insert("target".into(), json!(record.target));
            if let Some(category) = record.category {
                fields.insert("category".into(), json!(category.as_str()));
            }
            fields.insert("file".into(), json!(record.file));
            fields.insert("line".into(), json!(record.line));
            fields.insert("msg".into(), json!(msg.as_deref().unwrap_or_default()));
            let _ = writeln!(out, "{}", Value::Object(fields));
        }
    }
    drop(out);

    if capture {
        push_capture(CapturedLog {
            ts_ms,
            level: record.level,
            target: record.target,
            category: record.category,
            msg: msg.unwrap_or_default(),
        });
    }
}

fn push_capture(entry: CapturedLog) {
    let Some(Ok(mut guard)) = CAPTURE.get().map(|buf| buf.lock()) else {
        return;
    };
    let cap = CAPTURE_CAPACITY.load(Ordering::Relaxed);
    guard.push_back(entry);
    while guard.len() > cap {
        guard.pop_front();
    }
}

struct Timestamp(Duration);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let days = (secs / 86_400) as i64;
        let of_day = secs % 86_400;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
            of_day / 3600,
            (of_day % 3600) / 60,
            of_day % 60,
            self.0.subsec_millis()
        )
    }
}

// Howard Hinnant's days-to-civil conversion.
fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i32 + era as i32 * 400 + i32::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19_723), (2024, 1, 1));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }

    #[test]
    fn capture_keeps_recent_records() {
        enable_capture(2);
        clear_captured_logs();
        crate::log_info!("first");
        crate::log_info!("second");
        crate::log_warn!("third");
        let logs = capture_snapshot(10);
        let msgs: Vec<_> = logs.iter().map(|entry| entry.msg.as_str()).collect();
        assert!(msgs.ends_with(&["third"]));
        assert!(logs.len() <= 2);
    }
}
