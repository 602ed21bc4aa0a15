use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Derived session status. Never persisted; recomputed per request from the
/// caller's wall clock against the stored date/time fields. No timezone
/// normalization is applied, both sides are assumed to share a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Upcoming,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Present,
    Late,
    Absent,
    Excused,
}

impl RecordStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "late" => Some(Self::Late),
            "absent" => Some(Self::Absent),
            "excused" => Some(Self::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Late => "late",
            Self::Absent => "absent",
            Self::Excused => "excused",
        }
    }

    /// Present and late count toward the rate; absent and excused do not.
    /// Excused gets no special treatment in the ratio, only separate counts.
    pub fn attended(self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

pub fn parse_session_window(
    date: &str,
    start_time: &str,
    end_time: &str,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let start = NaiveTime::parse_from_str(start_time, "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end_time, "%H:%M").ok()?;
    Some((d.and_time(start), d.and_time(end)))
}

pub fn session_status(now: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> SessionStatus {
    if now < start {
        SessionStatus::Upcoming
    } else if now > end {
        SessionStatus::Completed
    } else {
        SessionStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRate {
    pub rate_percent: f64,
    pub attended_count: usize,
    pub matched_session_count: usize,
    pub excused_count: usize,
}

/// Rate over the sessions that carry a record for the student. Sessions with
/// no record stay out of the denominator; zero matched records is 0%, not NaN.
pub fn attendance_rate<I>(records: I) -> AttendanceRate
where
    I: IntoIterator<Item = RecordStatus>,
{
    let mut attended = 0_usize;
    let mut matched = 0_usize;
    let mut excused = 0_usize;
    for status in records {
        matched += 1;
        if status.attended() {
            attended += 1;
        }
        if status == RecordStatus::Excused {
            excused += 1;
        }
    }
    let rate_percent = if matched > 0 {
        100.0 * (attended as f64) / (matched as f64)
    } else {
        0.0
    };
    AttendanceRate {
        rate_percent,
        attended_count: attended,
        matched_session_count: matched,
        excused_count: excused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").expect("datetime literal")
    }

    #[test]
    fn session_window_transitions() {
        let (start, end) = parse_session_window("2024-01-01", "09:00", "10:00").expect("window");
        assert_eq!(session_status(at("2024-01-01T08:59"), start, end), SessionStatus::Upcoming);
        assert_eq!(session_status(at("2024-01-01T09:00"), start, end), SessionStatus::Active);
        assert_eq!(session_status(at("2024-01-01T09:30"), start, end), SessionStatus::Active);
        assert_eq!(session_status(at("2024-01-01T10:00"), start, end), SessionStatus::Active);
        assert_eq!(session_status(at("2024-01-01T11:00"), start, end), SessionStatus::Completed);
    }

    #[test]
    fn bad_window_fields_parse_to_none() {
        assert!(parse_session_window("2024-13-01", "09:00", "10:00").is_none());
        assert!(parse_session_window("2024-01-01", "9am", "10:00").is_none());
    }

    #[test]
    fn late_counts_as_attended_excused_does_not() {
        let out = attendance_rate([
            RecordStatus::Present,
            RecordStatus::Late,
            RecordStatus::Absent,
            RecordStatus::Excused,
        ]);
        assert!((out.rate_percent - 50.0).abs() < 1e-9);
        assert_eq!(out.attended_count, 2);
        assert_eq!(out.matched_session_count, 4);
        assert_eq!(out.excused_count, 1);
    }

    #[test]
    fn zero_matched_records_is_zero_percent() {
        let out = attendance_rate([]);
        assert_eq!(out.rate_percent, 0.0);
        assert_eq!(out.matched_session_count, 0);
    }

    #[test]
    fn rate_stays_bounded() {
        let all_present = attendance_rate(std::iter::repeat(RecordStatus::Present).take(17));
        assert!((all_present.rate_percent - 100.0).abs() < 1e-9);
        let all_absent = attendance_rate(std::iter::repeat(RecordStatus::Absent).take(9));
        assert_eq!(all_absent.rate_percent, 0.0);
    }
}
