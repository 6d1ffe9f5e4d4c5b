//! Local countdown for the shared room timer
//!
//! Remaining time is always derived from the server's absolute start time and
//! the configured duration, never decremented from a local counter, so a
//! missed tick, a backgrounded process or a refetch cannot make it drift.

mod ticker;

pub use ticker::Ticker;

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::models::{RoomSnapshot, TimerStatus};

/// Parse a server timestamp as UTC.
///
/// The server writes naive ISO-8601 strings (`2024-01-01T00:00:00.123456`)
/// that are UTC but carry no designator. A naive string is given a `Z`
/// before parsing; it must never be read as local time.
pub fn parse_server_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    anyhow::ensure!(!trimmed.is_empty(), "Empty timestamp");

    let parsed = if has_zone_designator(trimmed) {
        // Compact offsets (`+0000`) are not RFC 3339.
        DateTime::parse_from_rfc3339(trimmed)
            .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f%z"))
    } else {
        DateTime::parse_from_rfc3339(&format!("{}Z", trimmed))
    };

    parsed
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid server timestamp: {}", raw))
}

/// True if the string ends in `Z` or carries a `+hh:mm`/`+hhmm` style offset.
fn has_zone_designator(s: &str) -> bool {
    if s.ends_with('Z') || s.ends_with('z') {
        return true;
    }
    // The date part has its own dashes; only look after the time separator.
    match s.find(|c: char| c == 'T' || c == 't' || c == ' ') {
        Some(pos) => s[pos..].contains(|c: char| c == '+' || c == '-'),
        None => false,
    }
}

/// Whole seconds left until `started_at + minutes`, rounded up, never negative.
pub fn remaining_seconds(started_at: DateTime<Utc>, minutes: u32, now: DateTime<Utc>) -> u64 {
    let end = started_at + Duration::seconds(i64::from(minutes) * 60);
    let millis = (end - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1000) as u64
    }
}

/// `MM:SS`, minutes unbounded.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Elapsed share of the session in percent, clamped to 0..=100.
pub fn progress_percent(remaining: u64, minutes: u32) -> f64 {
    let total = u64::from(minutes) * 60;
    if total == 0 {
        return 0.0;
    }
    let elapsed = total.saturating_sub(remaining.min(total));
    (elapsed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Timer state as read from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Running {
        started_at: DateTime<Utc>,
        minutes: u32,
    },
    /// The server rewrites the duration to the minutes left when pausing.
    Paused { minutes: u32 },
    Stopped { minutes: u32 },
}

impl TimerPhase {
    pub fn from_snapshot(room: &RoomSnapshot) -> Self {
        let minutes = room.timer_minutes();
        match room.timer_status {
            TimerStatus::Running => match room.timer_start_time.as_deref() {
                Some(raw) => match parse_server_timestamp(raw) {
                    Ok(started_at) => TimerPhase::Running {
                        started_at,
                        minutes,
                    },
                    Err(e) => {
                        tracing::warn!("Treating timer as stopped: {:#}", e);
                        TimerPhase::Stopped { minutes }
                    }
                },
                None => {
                    tracing::debug!("Running timer without a start time, treating as stopped");
                    TimerPhase::Stopped { minutes }
                }
            },
            TimerStatus::Paused => TimerPhase::Paused { minutes },
            TimerStatus::Stopped => TimerPhase::Stopped { minutes },
        }
    }

    pub fn minutes(&self) -> u32 {
        match *self {
            TimerPhase::Running { minutes, .. }
            | TimerPhase::Paused { minutes }
            | TimerPhase::Stopped { minutes } => minutes,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TimerPhase::Running { .. })
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        match *self {
            TimerPhase::Running {
                started_at,
                minutes,
            } => remaining_seconds(started_at, minutes, now),
            TimerPhase::Paused { minutes } | TimerPhase::Stopped { minutes } => {
                u64::from(minutes) * 60
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimerPhase::Running { .. } => "running",
            TimerPhase::Paused { .. } => "paused",
            TimerPhase::Stopped { .. } => "stopped",
        }
    }
}

/// A finished run, reported once per `(room, start time)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Completion {
    pub room_id: String,
    pub started_at: DateTime<Utc>,
    pub minutes: u32,
}

/// Result of recomputing the countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub remaining: u64,
    /// Set on the single tick where an owner's run reaches zero.
    pub completed: Option<Completion>,
}

/// Countdown for one room.
pub struct Countdown {
    room_id: String,
    phase: TimerPhase,
    remaining: u64,
    fired: HashSet<(String, DateTime<Utc>)>,
}

impl Countdown {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            phase: TimerPhase::Stopped {
                minutes: crate::models::DEFAULT_TIMER_MINUTES,
            },
            remaining: u64::from(crate::models::DEFAULT_TIMER_MINUTES) * 60,
            fired: HashSet::new(),
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    /// Adopt the timer state of a fresh snapshot and recompute immediately.
    pub fn sync(&mut self, room: &RoomSnapshot, now: DateTime<Utc>, is_owner: bool) -> Tick {
        let phase = TimerPhase::from_snapshot(room);
        if phase != self.phase {
            tracing::debug!(
                "Room {} timer {} -> {}",
                self.room_id,
                self.phase.label(),
                phase.label()
            );
        }
        self.phase = phase;
        self.tick(now, is_owner)
    }

    /// Drop back to an idle timer, e.g. when the snapshot is discarded.
    pub fn stop(&mut self) {
        self.phase = TimerPhase::Stopped {
            minutes: self.phase.minutes(),
        };
        self.remaining = 0;
    }

    /// Recompute remaining time. Only the owner's client reports completion,
    /// and only once for a given start time.
    pub fn tick(&mut self, now: DateTime<Utc>, is_owner: bool) -> Tick {
        self.remaining = self.phase.remaining_at(now);

        let completed = match self.phase {
            TimerPhase::Running {
                started_at,
                minutes,
            } if self.remaining == 0 && is_owner => {
                if self.fired.insert((self.room_id.clone(), started_at)) {
                    Some(Completion {
                        room_id: self.room_id.clone(),
                        started_at,
                        minutes,
                    })
                } else {
                    None
                }
            }
            _ => None,
        };

        Tick {
            remaining: self.remaining,
            completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn running_room(start: &str, minutes: u32) -> RoomSnapshot {
        serde_json::from_value(serde_json::json!({
            "roomId": "r1",
            "timerStatus": "running",
            "timerStartTime": start,
            "timerDuration": minutes,
        }))
        .unwrap()
    }

    #[test]
    fn naive_timestamps_are_utc() {
        let naive = parse_server_timestamp("2024-01-01T00:00:00").unwrap();
        let zulu = parse_server_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(naive, zulu);
        assert_eq!(naive, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn python_isoformat_with_micros_parses() {
        let t = parse_server_timestamp("2024-03-05T10:20:30.123456").unwrap();
        assert_eq!(t.timestamp_subsec_micros(), 123456);
    }

    #[test]
    fn explicit_offsets_are_respected() {
        let t = parse_server_timestamp("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let t = parse_server_timestamp("2023-12-31T19:00:00-05:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn compact_offsets_parse() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_server_timestamp("2024-01-01T00:00:00+0000").unwrap(), midnight);
        assert_eq!(
            parse_server_timestamp("2024-01-01T02:00:00.5+0200").unwrap(),
            midnight + Duration::milliseconds(500)
        );

        let room = running_room("2024-01-01T00:00:00+0000", 25);
        assert!(matches!(TimerPhase::from_snapshot(&room), TimerPhase::Running { .. }));
    }

    #[test]
    fn garbage_timestamps_fail() {
        assert!(parse_server_timestamp("").is_err());
        assert!(parse_server_timestamp("yesterday").is_err());
    }

    #[test]
    fn remaining_matches_offset_for_every_second() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let minutes = 3;
        let total = i64::from(minutes) * 60;
        for k in 0..=total {
            let now = start + Duration::seconds(total - k);
            assert_eq!(remaining_seconds(start, minutes, now), k as u64);
        }
    }

    #[test]
    fn remaining_rounds_partial_seconds_up() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let now = start + Duration::milliseconds(60_000 - 1_500);
        assert_eq!(remaining_seconds(start, 1, now), 2);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let late = start + Duration::hours(5);
        assert_eq!(remaining_seconds(start, 25, late), 0);
    }

    #[test]
    fn running_without_start_is_stopped() {
        let room: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "r1",
            "timerStatus": "running",
            "timerStartTime": null,
            "timerDuration": 25,
        }))
        .unwrap();
        assert_eq!(
            TimerPhase::from_snapshot(&room),
            TimerPhase::Stopped { minutes: 25 }
        );
    }

    #[test]
    fn paused_shows_the_stored_minutes() {
        let room: RoomSnapshot = serde_json::from_value(serde_json::json!({
            "roomId": "r1",
            "timerStatus": "paused",
            "timerDuration": 12,
        }))
        .unwrap();
        let phase = TimerPhase::from_snapshot(&room);
        assert_eq!(phase.remaining_at(Utc::now()), 12 * 60);
    }

    #[test]
    fn completion_fires_once_per_start_time() {
        let room = running_room("2024-01-01T00:00:00", 25);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::minutes(25);
        let mut countdown = Countdown::new("r1");

        let tick = countdown.sync(&room, end - Duration::seconds(2), true);
        assert_eq!(tick.remaining, 2);
        assert!(tick.completed.is_none());

        let tick = countdown.tick(end, true);
        assert_eq!(tick.remaining, 0);
        let completion = tick.completed.unwrap();
        assert_eq!(completion.started_at, start);
        assert_eq!(completion.minutes, 25);

        // Later ticks and a refetch that still shows the same run stay quiet.
        assert!(countdown.tick(end + Duration::seconds(1), true).completed.is_none());
        assert!(countdown
            .sync(&room, end + Duration::seconds(3), true)
            .completed
            .is_none());

        // A new run from the same room fires again.
        let restarted = running_room("2024-01-01T01:00:00", 25);
        let tick = countdown.sync(&restarted, end + Duration::hours(1), true);
        assert!(tick.completed.is_some());
    }

    #[test]
    fn non_owner_never_completes() {
        let room = running_room("2024-01-01T00:00:00", 1);
        let mut countdown = Countdown::new("r1");
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let tick = countdown.sync(&room, late, false);
        assert_eq!(tick.remaining, 0);
        assert!(tick.completed.is_none());
    }

    #[test]
    fn clock_and_progress_formatting() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(25 * 60), "25:00");
        assert_eq!(format_clock(61), "01:01");
        assert_eq!(progress_percent(25 * 60, 25), 0.0);
        assert_eq!(progress_percent(0, 25), 100.0);
        assert_eq!(progress_percent(10_000, 1), 0.0);
        assert_eq!(progress_percent(30, 1), 50.0);
    }
}
