//! Weekly exchange-hours table keyed by ISO MIC code.
//!
//! Offsets are standard-time UTC offsets; DST shifts, holidays, and
//! intra-day lunch breaks are not modeled — an exchange counts as open
//! for its whole open-to-close window on trading weekdays.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ExchangeCalendar;

/// Trading weekday patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Days {
    MonFri,
    SunThu,
}

impl Days {
    fn contains(self, weekday_from_monday: u32) -> bool {
        match self {
            Days::MonFri => weekday_from_monday <= 4,
            Days::SunThu => weekday_from_monday <= 3 || weekday_from_monday == 6,
        }
    }
}

/// (mic, utc offset minutes, open minutes-of-day, close minutes-of-day, days)
type Entry = (&'static str, i32, u32, u32, Days);

const fn hm(h: u32, m: u32) -> u32 {
    h * 60 + m
}

#[rustfmt::skip]
static HOURS: &[Entry] = &[
    // North America
    ("XNYS", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XNAS", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XNGS", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XNMS", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XNCM", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("ARCX", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("BATS", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XASE", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("IEXG", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("OTCM", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XTSE", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XTSX", -5 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XMEX", -6 * 60, hm(8, 30), hm(15, 0), Days::MonFri),
    // South America
    ("BVMF", -3 * 60, hm(10, 0), hm(17, 0), Days::MonFri),
    ("XLIM", -5 * 60, hm(9, 0), hm(16, 0), Days::MonFri),
    ("XSGO", -4 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    // Europe
    ("XLON", 0, hm(8, 0), hm(16, 30), Days::MonFri),
    ("XFRA", 60, hm(8, 0), hm(23, 0), Days::MonFri),
    ("XETR", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XPAR", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XAMS", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XBRU", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XLIS", 0, hm(8, 0), hm(16, 30), Days::MonFri),
    ("XMIL", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("MTAA", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XMAD", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XSWX", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XWBO", 60, hm(9, 5), hm(17, 30), Days::MonFri),
    ("XSTO", 60, hm(9, 0), hm(17, 30), Days::MonFri),
    ("XCSE", 60, hm(9, 0), hm(17, 0), Days::MonFri),
    ("XHEL", 2 * 60, hm(10, 0), hm(18, 30), Days::MonFri),
    ("XOSL", 60, hm(9, 0), hm(16, 20), Days::MonFri),
    ("XWAR", 60, hm(9, 0), hm(17, 5), Days::MonFri),
    ("XIST", 3 * 60, hm(10, 0), hm(18, 0), Days::MonFri),
    ("XATH", 2 * 60, hm(10, 0), hm(17, 20), Days::MonFri),
    ("XBUD", 60, hm(9, 0), hm(17, 5), Days::MonFri),
    ("XPRA", 60, hm(9, 0), hm(17, 0), Days::MonFri),
    // Asia-Pacific
    ("XTKS", 9 * 60, hm(9, 0), hm(15, 0), Days::MonFri),
    ("XHKG", 8 * 60, hm(9, 30), hm(16, 0), Days::MonFri),
    ("XSES", 8 * 60, hm(9, 0), hm(17, 0), Days::MonFri),
    ("XASX", 10 * 60, hm(10, 0), hm(16, 0), Days::MonFri),
    ("XKRX", 9 * 60, hm(9, 0), hm(15, 30), Days::MonFri),
    ("XTAI", 8 * 60, hm(9, 0), hm(13, 30), Days::MonFri),
    ("ROCO", 8 * 60, hm(9, 0), hm(13, 30), Days::MonFri),
    ("XSHG", 8 * 60, hm(9, 30), hm(15, 0), Days::MonFri),
    ("XSHE", 8 * 60, hm(9, 30), hm(15, 0), Days::MonFri),
    ("XNSE", 5 * 60 + 30, hm(9, 15), hm(15, 30), Days::MonFri),
    ("XBOM", 5 * 60 + 30, hm(9, 15), hm(15, 30), Days::MonFri),
    ("XNZE", 12 * 60, hm(10, 0), hm(16, 45), Days::MonFri),
    // Middle East / Africa
    ("XTAE", 2 * 60, hm(10, 0), hm(17, 25), Days::SunThu),
    ("XJSE", 2 * 60, hm(9, 0), hm(17, 0), Days::MonFri),
];

/// Weekday open/closed lookup over the built-in hours table.
///
/// MIC codes absent from the table are treated as closed unless listed
/// in the `assume_open` override set.
pub struct WeeklyCalendar {
    table: FxHashMap<&'static str, (i32, u32, u32, Days)>,
    assume_open: FxHashSet<String>,
}

impl Default for WeeklyCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl WeeklyCalendar {
    pub fn new() -> Self {
        let table = HOURS
            .iter()
            .map(|&(mic, off, open, close, days)| (mic, (off, open, close, days)))
            .collect();
        Self {
            table,
            assume_open: FxHashSet::default(),
        }
    }

    /// Treat the given MIC codes as always open even though the table
    /// has no hours for them.
    pub fn assume_open<I, S>(mut self, mics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.assume_open
            .extend(mics.into_iter().map(|m| m.as_ref().trim().to_uppercase()));
        self
    }

    /// Open/closed at an explicit instant, for deterministic tests.
    pub fn is_open_at(&self, mic: &str, now: DateTime<Utc>) -> bool {
        let key = mic.trim().to_uppercase();
        let Some(&(offset_min, open, close, days)) = self.table.get(key.as_str()) else {
            return self.assume_open.contains(&key);
        };

        let Some(offset) = FixedOffset::east_opt(offset_min * 60) else {
            return false;
        };
        let local = now.with_timezone(&offset);
        if !days.contains(local.weekday().num_days_from_monday()) {
            return false;
        }
        let minute_of_day = local.hour() * 60 + local.minute();
        open <= minute_of_day && minute_of_day <= close
    }
}

impl ExchangeCalendar for WeeklyCalendar {
    fn is_open(&self, mic: &str) -> bool {
        self.is_open_at(mic, Utc::now())
    }
}
