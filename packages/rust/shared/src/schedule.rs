//! Weekly recurrence schedules.
//!
//! Schedules arrive as `{days: [0-6], hour, minute}` with `0 = Sunday`.
//! Triggers count weekdays from Monday (`0 = Monday`), so every day has two
//! indices: [`Weekday::api_index`] and [`Weekday::trigger_index`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Days, NaiveDateTime, TimeDelta, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PageWatchError, Result};

// ---------------------------------------------------------------------------
// Weekday
// ---------------------------------------------------------------------------

/// Day of the week, ordered Sunday-first like the schedule encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    /// Parse the schedule encoding (`0 = Sunday` .. `6 = Saturday`).
    pub fn from_api_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Index in the schedule encoding (`0 = Sunday`).
    pub fn api_index(self) -> u8 {
        self as u8
    }

    /// Index in the trigger encoding (`0 = Monday` .. `6 = Sunday`).
    pub fn trigger_index(self) -> u8 {
        match self {
            Weekday::Sunday => 6,
            Weekday::Monday => 0,
            Weekday::Tuesday => 1,
            Weekday::Wednesday => 2,
            Weekday::Thursday => 3,
            Weekday::Friday => 4,
            Weekday::Saturday => 5,
        }
    }

    /// Three-letter English abbreviation.
    pub fn short_name(self) -> &'static str {
        match self {
            Weekday::Sunday => "Sun",
            Weekday::Monday => "Mon",
            Weekday::Tuesday => "Tue",
            Weekday::Wednesday => "Wed",
            Weekday::Thursday => "Thu",
            Weekday::Friday => "Fri",
            Weekday::Saturday => "Sat",
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A validated weekly schedule: a non-empty set of weekdays at a fixed time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleRepr", into = "ScheduleRepr")]
pub struct Schedule {
    days: BTreeSet<Weekday>,
    hour: u8,
    minute: u8,
}

/// Wire shape of a schedule: `{"days": [0-6], "hour": 0-23, "minute": 0-59}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduleRepr {
    days: Vec<u8>,
    hour: u8,
    minute: u8,
}

impl TryFrom<ScheduleRepr> for Schedule {
    type Error = PageWatchError;

    fn try_from(repr: ScheduleRepr) -> Result<Self> {
        Schedule::from_api_days(&repr.days, repr.hour, repr.minute)
    }
}

impl From<Schedule> for ScheduleRepr {
    fn from(schedule: Schedule) -> Self {
        Self {
            days: schedule.api_days(),
            hour: schedule.hour,
            minute: schedule.minute,
        }
    }
}

impl Schedule {
    /// Build a schedule from typed weekdays.
    pub fn new(days: impl IntoIterator<Item = Weekday>, hour: u8, minute: u8) -> Result<Self> {
        let days: BTreeSet<Weekday> = days.into_iter().collect();
        if days.is_empty() {
            return Err(PageWatchError::validation("schedule needs at least one day"));
        }
        if hour > 23 {
            return Err(PageWatchError::validation(format!(
                "hour {hour} out of range 0-23"
            )));
        }
        if minute > 59 {
            return Err(PageWatchError::validation(format!(
                "minute {minute} out of range 0-59"
            )));
        }
        Ok(Self { days, hour, minute })
    }

    /// Build a schedule from the `0 = Sunday` day encoding.
    pub fn from_api_days(days: &[u8], hour: u8, minute: u8) -> Result<Self> {
        let days = days
            .iter()
            .map(|&d| {
                Weekday::from_api_index(d).ok_or_else(|| {
                    PageWatchError::validation(format!("weekday {d} out of range 0-6"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(days, hour, minute)
    }

    /// Parse a JSON schedule payload.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PageWatchError::validation(format!("invalid schedule: {e}")))
    }

    /// Serialize to the JSON wire shape.
    pub fn to_json(&self) -> String {
        let repr = ScheduleRepr::from(self.clone());
        // ScheduleRepr only holds integers, serialization cannot fail.
        serde_json::to_string(&repr).unwrap_or_default()
    }

    pub fn days(&self) -> impl Iterator<Item = Weekday> + '_ {
        self.days.iter().copied()
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Days in the `0 = Sunday` encoding, ascending.
    pub fn api_days(&self) -> Vec<u8> {
        self.days.iter().map(|d| d.api_index()).collect()
    }

    /// Days in the `0 = Monday` trigger encoding, ascending.
    pub fn trigger_days(&self) -> Vec<u8> {
        let mut days: Vec<u8> = self.days.iter().map(|d| d.trigger_index()).collect();
        days.sort_unstable();
        days
    }

    /// The first fire time strictly after `after`, in the same time zone.
    ///
    /// A slot that falls inside a DST gap fires one hour later on the wall
    /// clock, which is the instant the pre-transition offset would give.
    pub fn next_fire_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let today = after.date_naive();
        let trigger_days = self.trigger_days();

        for offset in 0..=14 {
            let Some(date) = today.checked_add_days(Days::new(offset)) else {
                continue;
            };
            let trigger_day = date.weekday().num_days_from_monday() as u8;
            if !trigger_days.contains(&trigger_day) {
                continue;
            }
            let Some(naive) = date.and_hms_opt(self.hour.into(), self.minute.into(), 0) else {
                continue;
            };
            let Some(candidate) = resolve_local(&tz, naive) else {
                continue;
            };
            if candidate > *after {
                return Some(candidate);
            }
        }
        None
    }
}

/// Map a wall-clock time to an instant. Ambiguous times take the earlier one.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        let shifted = naive.checked_add_signed(TimeDelta::hours(1))?;
        tz.from_local_datetime(&shifted).earliest()
    })
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let days: Vec<&str> = self.days.iter().map(|d| d.short_name()).collect();
        write!(f, "{} {:02}:{:02}", days.join(","), self.hour, self.minute)
    }
}

// ---------------------------------------------------------------------------
// Argument parsing helpers
// ---------------------------------------------------------------------------

/// Parse a comma-separated list of `0 = Sunday` day indices, e.g. `"1,3,5"`.
pub fn parse_api_days(input: &str) -> Result<Vec<u8>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u8>()
                .map_err(|_| PageWatchError::validation(format!("invalid weekday `{s}`")))
        })
        .collect()
}

/// Parse a `HH:MM` time of day.
pub fn parse_time_of_day(input: &str) -> Result<(u8, u8)> {
    static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(\d{1,2}):(\d{2})$").expect("valid regex")
    });

    let caps = TIME_RE.captures(input.trim()).ok_or_else(|| {
        PageWatchError::validation(format!("invalid time `{input}`, expected HH:MM"))
    })?;
    let hour: u8 = caps[1]
        .parse()
        .map_err(|_| PageWatchError::validation(format!("invalid hour in `{input}`")))?;
    let minute: u8 = caps[2]
        .parse()
        .map_err(|_| PageWatchError::validation(format!("invalid minute in `{input}`")))?;
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, LocalResult, Utc};

    #[test]
    fn weekday_mapping_matches_trigger_encoding() {
        let expected = [(0, 6), (1, 0), (2, 1), (3, 2), (4, 3), (5, 4), (6, 5)];
        for (api, trigger) in expected {
            let day = Weekday::from_api_index(api).unwrap();
            assert_eq!(day.trigger_index(), trigger, "api day {api}");
        }
    }

    #[test]
    fn weekday_mapping_is_a_bijection() {
        let mut seen = BTreeSet::new();
        for api in 0..7u8 {
            assert!(seen.insert(Weekday::from_api_index(api).unwrap().trigger_index()));
        }
        assert_eq!(seen.len(), 7);
        assert!(Weekday::from_api_index(7).is_none());
    }

    #[test]
    fn every_api_day_fires_on_that_weekday() {
        // 2024-01-01 is a Monday.
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for api in 0..7u8 {
            let schedule = Schedule::from_api_days(&[api], 12, 0).unwrap();
            let next = schedule.next_fire_after(&now).unwrap();
            assert_eq!(next.weekday().num_days_from_sunday(), u32::from(api), "api day {api}");
        }
    }

    /// UTC-5 until 2024-03-10 07:00 UTC, UTC-4 after. Local 02:00-03:00 on
    /// that day does not exist.
    #[derive(Debug, Clone, Copy)]
    struct SpringForward;

    impl SpringForward {
        fn switch() -> NaiveDateTime {
            chrono::NaiveDate::from_ymd_opt(2024, 3, 10)
                .unwrap()
                .and_hms_opt(7, 0, 0)
                .unwrap()
        }

        fn standard() -> FixedOffset {
            FixedOffset::west_opt(5 * 3600).unwrap()
        }

        fn daylight() -> FixedOffset {
            FixedOffset::west_opt(4 * 3600).unwrap()
        }
    }

    impl TimeZone for SpringForward {
        type Offset = FixedOffset;

        fn from_offset(_offset: &FixedOffset) -> Self {
            SpringForward
        }

        fn offset_from_local_date(&self, _local: &chrono::NaiveDate) -> LocalResult<FixedOffset> {
            LocalResult::Single(Self::standard())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let as_standard = *local + TimeDelta::hours(5);
            let as_daylight = *local + TimeDelta::hours(4);
            match (as_standard < Self::switch(), as_daylight >= Self::switch()) {
                (true, true) => LocalResult::Ambiguous(Self::standard(), Self::daylight()),
                (true, false) => LocalResult::Single(Self::standard()),
                (false, true) => LocalResult::Single(Self::daylight()),
                (false, false) => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, _utc: &chrono::NaiveDate) -> FixedOffset {
            Self::standard()
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            if *utc < Self::switch() {
                Self::standard()
            } else {
                Self::daylight()
            }
        }
    }

    #[test]
    fn slot_inside_dst_gap_still_fires() {
        // Sunday 02:30 does not exist on 2024-03-10 in this zone.
        let schedule = Schedule::new([Weekday::Sunday], 2, 30).unwrap();
        let after = SpringForward
            .from_local_datetime(
                &chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
                    .unwrap()
                    .and_hms_opt(12, 0, 0)
                    .unwrap(),
            )
            .single()
            .unwrap();

        let next = schedule.next_fire_after(&after).expect("slot in gap must resolve");
        assert_eq!(next.naive_local().to_string(), "2024-03-10 03:30:00");
        assert_eq!(next.naive_utc().to_string(), "2024-03-10 07:30:00");

        // The week after is a normal slot again.
        let following = schedule.next_fire_after(&next).unwrap();
        assert_eq!(following.naive_local().to_string(), "2024-03-17 02:30:00");
    }

    #[test]
    fn schedule_json_roundtrip() {
        let schedule = Schedule::from_json(r#"{"days":[0,6,3],"hour":8,"minute":5}"#).unwrap();
        assert_eq!(schedule.api_days(), vec![0, 3, 6]);
        assert_eq!(schedule.trigger_days(), vec![2, 5, 6]);
        assert_eq!(schedule.to_json(), r#"{"days":[0,3,6],"hour":8,"minute":5}"#);
        assert_eq!(schedule.to_string(), "Sun,Wed,Sat 08:05");
    }

    #[test]
    fn schedule_rejects_out_of_range_values() {
        assert!(Schedule::from_json(r#"{"days":[7],"hour":8,"minute":0}"#).is_err());
        assert!(Schedule::from_json(r#"{"days":[1],"hour":24,"minute":0}"#).is_err());
        assert!(Schedule::from_json(r#"{"days":[1],"hour":8,"minute":60}"#).is_err());
        assert!(Schedule::from_json(r#"{"days":[],"hour":8,"minute":0}"#).is_err());
        assert!(Schedule::from_json(r#"{"days":[1],"hour":-1,"minute":0}"#).is_err());
    }

    #[test]
    fn next_fire_same_day_later() {
        // 2024-01-01 is a Monday.
        let schedule = Schedule::new([Weekday::Monday], 9, 30).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let next = schedule.next_fire_after(&now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn next_fire_skips_to_next_week_when_slot_passed() {
        let schedule = Schedule::new([Weekday::Monday], 9, 30).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();
        let next = schedule.next_fire_after(&now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 30, 0).unwrap());
    }

    #[test]
    fn next_fire_picks_nearest_day() {
        let schedule = Schedule::new([Weekday::Sunday, Weekday::Wednesday], 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = schedule.next_fire_after(&now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
    }

    #[test]
    fn next_fire_respects_offset() {
        let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
        let schedule = Schedule::new([Weekday::Tuesday], 1, 0).unwrap();
        // Monday 20:00 UTC is Tuesday 04:00 in UTC+8, so the next slot is a week later.
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 20, 0, 0)
            .unwrap()
            .with_timezone(&shanghai);
        let next = schedule.next_fire_after(&now).unwrap();
        assert_eq!(next.date_naive().to_string(), "2024-01-09");
    }

    #[test]
    fn parses_cli_helpers() {
        assert_eq!(parse_api_days("1, 3,5").unwrap(), vec![1, 3, 5]);
        assert!(parse_api_days("mon").is_err());
        assert_eq!(parse_time_of_day("09:30").unwrap(), (9, 30));
        assert_eq!(parse_time_of_day("7:05").unwrap(), (7, 5));
        assert!(parse_time_of_day("0930").is_err());
    }
}
