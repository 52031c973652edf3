//! Recurrence rules and their resolution into concrete occurrences.
//!
//! Each rule kind resolves independently; every function here is pure and
//! takes the evaluation time and site timezone as arguments.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, TimeZone,
    Utc,
};
use serde::{Deserialize, Serialize};

pub const ALL_AGENTS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Daily,
    Weekly,
    OneOff,
}

/// An administrator-declared suppression window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindowDefinition {
    /// Agent id, or "all".
    #[serde(default = "all_agents")]
    pub agent: String,
    #[serde(default)]
    pub label: String,
    pub recurrence: Recurrence,
    /// ISO weekday, 1 = Monday. Weekly windows only.
    #[serde(default)]
    pub day_of_week: Option<u32>,
    /// Wall-clock start, "HH:MM".
    pub time_of_day: String,
    pub duration_minutes: i64,
    /// "YYYY-MM-DD". One-off windows only.
    #[serde(default)]
    pub date: Option<String>,
}

fn all_agents() -> String {
    ALL_AGENTS.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveMode {
    /// The occurrence containing the timestamp.
    Current,
    /// The first occurrence starting after the timestamp.
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_active: bool,
}

impl MaintenanceWindowDefinition {
    pub fn targets(&self, agent_id: &str) -> bool {
        self.agent.eq_ignore_ascii_case(ALL_AGENTS) || self.agent == agent_id
    }

    pub fn display_label(&self) -> &str {
        if self.label.trim().is_empty() {
            "maintenance"
        } else {
            &self.label
        }
    }
}

/// Resolve a definition against `at`. Unresolvable definitions give `None`.
pub fn resolve_occurrence(
    def: &MaintenanceWindowDefinition,
    at: DateTime<Utc>,
    mode: ResolveMode,
    tz: &FixedOffset,
) -> Option<Occurrence> {
    if def.duration_minutes <= 0 {
        return None;
    }
    let time = parse_time_of_day(&def.time_of_day)?;
    let duration = ChronoDuration::try_minutes(def.duration_minutes)?;

    let start = match def.recurrence {
        Recurrence::Daily => shifted_anchor(daily_anchor(at, time, tz)?, at, mode, ChronoDuration::days(1))?,
        Recurrence::Weekly => {
            let weekday = def.day_of_week.filter(|d| (1..=7).contains(d))?;
            shifted_anchor(weekly_anchor(at, weekday, time, tz)?, at, mode, ChronoDuration::weeks(1))?
        }
        Recurrence::OneOff => {
            let date = NaiveDate::parse_from_str(def.date.as_deref()?.trim(), "%Y-%m-%d").ok()?;
            local_to_utc(date, time, tz)?
        }
    };
    let end = start.checked_add_signed(duration)?;

    match mode {
        ResolveMode::Current if start <= at && at <= end => Some(Occurrence {
            start,
            end,
            is_active: true,
        }),
        ResolveMode::Next if start > at => Some(Occurrence {
            start,
            end,
            is_active: false,
        }),
        _ => None,
    }
}

/// "HH:MM" (also accepts "HH:MM:SS").
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

fn daily_anchor(at: DateTime<Utc>, time: NaiveTime, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let today = at.with_timezone(tz).date_naive();
    local_to_utc(today, time, tz)
}

fn weekly_anchor(
    at: DateTime<Utc>,
    weekday: u32,
    time: NaiveTime,
    tz: &FixedOffset,
) -> Option<DateTime<Utc>> {
    let today = at.with_timezone(tz).date_naive();
    let monday = today.checked_sub_signed(ChronoDuration::days(today.weekday().num_days_from_monday() as i64))?;
    let day = monday.checked_add_signed(ChronoDuration::days(weekday as i64 - 1))?;
    local_to_utc(day, time, tz)
}

/// Step the anchor back (current) or forward (next) by one period when it
/// sits on the wrong side of `at`. `None` past the edge of the calendar.
fn shifted_anchor(
    anchor: DateTime<Utc>,
    at: DateTime<Utc>,
    mode: ResolveMode,
    period: ChronoDuration,
) -> Option<DateTime<Utc>> {
    match mode {
        ResolveMode::Current if anchor > at => anchor.checked_sub_signed(period),
        ResolveMode::Next if anchor <= at => anchor.checked_add_signed(period),
        _ => Some(anchor),
    }
}

fn local_to_utc(date: NaiveDate, time: NaiveTime, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
