use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::AttendanceRecord;

/// Rate change, in percentage points, that still counts as stable.
pub const TREND_BAND: f64 = 5.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_students: usize,
    pub present: usize,
    pub absent: usize,
    /// Present over total, in percent. Not rounded.
    pub attendance_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAttendance {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub stats: AttendanceStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAttendance {
    pub session: String,
    #[serde(flatten)]
    pub stats: AttendanceStats,
}

pub fn reduce<I>(marks: I) -> AttendanceStats
where
    I: IntoIterator<Item = bool>,
{
    let mut stats = AttendanceStats::default();
    for present in marks {
        stats.total_students += 1;
        if present {
            stats.present += 1;
        } else {
            stats.absent += 1;
        }
    }
    if stats.total_students > 0 {
        stats.attendance_rate = stats.present as f64 / stats.total_students as f64 * 100.0;
    }
    stats
}

pub fn trend(current_rate: f64, previous_rate: f64) -> Trend {
    if current_rate > previous_rate + TREND_BAND {
        Trend::Up
    } else if current_rate < previous_rate - TREND_BAND {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Per-day stats in date order. Days without records are left out.
pub fn daily(records: &[AttendanceRecord]) -> Vec<DailyAttendance> {
    let mut by_day: BTreeMap<NaiveDate, Vec<bool>> = BTreeMap::new();
    for record in records {
        by_day
            .entry(record.attended_on)
            .or_default()
            .push(record.present);
    }

    by_day
        .into_iter()
        .map(|(date, marks)| DailyAttendance {
            date,
            stats: reduce(marks),
        })
        .collect()
}

/// Per-session stats ordered by session name.
pub fn by_session(records: &[AttendanceRecord]) -> Vec<SessionAttendance> {
    let mut sessions: BTreeMap<&str, Vec<bool>> = BTreeMap::new();
    for record in records {
        sessions
            .entry(record.session.as_str())
            .or_default()
            .push(record.present);
    }

    sessions
        .into_iter()
        .map(|(session, marks)| SessionAttendance {
            session: session.to_string(),
            stats: reduce(marks),
        })
        .collect()
}
