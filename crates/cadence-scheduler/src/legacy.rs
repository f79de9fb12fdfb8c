//! Legacy schedule import.
//!
//! Reads a JSON dump of document-store events and recreates them as
//! relational events. Each record is translated and stored in its own
//! transaction; bad records are counted and skipped.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    EventDraft, EventTarget, NotificationBundle, NotificationSetting, Periodicity, PeriodicityType,
    Reminder, TimerType,
};
use crate::notify::normalize_bundle;
use crate::periodicity::selected_date_from_parts;
use crate::persistence::ScheduleDb;
use crate::store;
use cadence_core::error::{CadenceError, Result};

/// Legacy object id: a 24-hex string, `{"$oid": "..."}` or a plain integer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LegacyId {
    Int(i64),
    Hex(String),
    Oid {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl LegacyId {
    /// Integer id derived from the low 60 bits of the object id.
    pub fn to_id(&self) -> Result<i64> {
        let hex = match self {
            Self::Int(id) => return Ok(*id),
            Self::Hex(s) => s.as_str(),
            Self::Oid { oid } => oid.as_str(),
        };
        let hex = hex.trim();
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CadenceError::validation(format!("invalid object id '{hex}'")));
        }
        let tail = &hex[hex.len().saturating_sub(15)..];
        i64::from_str_radix(tail, 16).map_err(|e| CadenceError::validation(format!("invalid object id '{hex}': {e}")))
    }
}

impl std::fmt::Display for LegacyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Hex(s) => f.write_str(s),
            Self::Oid { oid } => f.write_str(oid),
        }
    }
}

/// A number the legacy store kept as either int, float or string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Int(i64),
    Float(f64),
    Str(String),
}

impl LooseNumber {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyEvent {
    #[serde(rename = "_id", alias = "id")]
    pub id: LegacyId,
    pub applet_id: LegacyId,
    #[serde(default)]
    pub individualized: bool,
    #[serde(default)]
    pub data: LegacyData,
    #[serde(default)]
    pub schedule: LegacySchedule,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyData {
    #[serde(default, rename = "activity_id")]
    pub activity_id: Option<LegacyId>,
    #[serde(default, rename = "activity_flow_id")]
    pub activity_flow_id: Option<LegacyId>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub is_activity_flow: Option<bool>,
    #[serde(default)]
    pub only_scheduled_day: Option<bool>,
    #[serde(default)]
    pub idle_time: Option<IdleTime>,
    #[serde(default)]
    pub notifications: Option<Vec<LegacyNotification>>,
    #[serde(default)]
    pub reminder: Option<LegacyReminder>,
    #[serde(default)]
    pub users: Option<Vec<LegacyId>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdleTime {
    #[serde(default)]
    pub allow: bool,
    pub minute: LooseNumber,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyNotification {
    #[serde(default)]
    pub allow: Option<bool>,
    #[serde(default)]
    pub random: bool,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyReminder {
    pub days: LooseNumber,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub valid: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySchedule {
    /// Epoch milliseconds.
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
    #[serde(default)]
    pub day_of_month: Option<Vec<u32>>,
    #[serde(default)]
    pub month: Option<Vec<u32>>,
    #[serde(default)]
    pub year: Option<Vec<i32>>,
}

fn parse_hm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

fn periodicity_type(event_type: Option<&str>) -> Result<PeriodicityType> {
    let Some(raw) = event_type.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(PeriodicityType::Always);
    };
    let upper = raw.to_ascii_uppercase();
    match upper.as_str() {
        "WEEKDAYS" => Ok(PeriodicityType::Weekday),
        other => PeriodicityType::parse(other)
            .ok_or_else(|| CadenceError::validation(format!("unknown eventType '{raw}'"))),
    }
}

fn millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| CadenceError::validation(format!("timestamp {ms} out of range")))
}

fn translate_notifications(data: &LegacyData) -> NotificationBundle {
    let mut notifications = Vec::new();
    for n in data.notifications.iter().flatten() {
        if n.allow != Some(true) {
            continue;
        }
        let setting = if n.random {
            match (n.start.as_deref().and_then(parse_hm), n.end.as_deref().and_then(parse_hm)) {
                (Some(from), Some(to)) => NotificationSetting::random(from, to),
                _ => continue,
            }
        } else {
            match n.start.as_deref().and_then(parse_hm) {
                Some(at) => NotificationSetting::fixed(at),
                None => continue,
            }
        };
        notifications.push(setting);
    }

    let reminder = data
        .reminder
        .as_ref()
        .filter(|r| r.valid)
        .and_then(|r| {
            let time = r.time.as_deref().and_then(parse_hm)?;
            let days = r.days.as_f64().filter(|d| *d >= 0.0)? as u32;
            Some(Reminder { activity_incomplete: days, reminder_time: time })
        });

    NotificationBundle { notifications, reminder }
}

/// Idle minutes as a timer. Negative, non-finite and unrepresentable
/// values are rejected.
fn idle_timer(minutes: f64) -> Result<Duration> {
    let out_of_range = || CadenceError::validation(format!("idleTime.minute {minutes} out of range"));
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(out_of_range());
    }
    let secs = (minutes * 60.0).round();
    if secs >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    Duration::try_seconds(secs as i64).ok_or_else(out_of_range)
}

/// Map one legacy document to a draft.
pub fn translate(event: &LegacyEvent) -> Result<EventDraft> {
    let data = &event.data;
    let kind = periodicity_type(data.event_type.as_deref())?;
    let mut periodicity = Periodicity::new(kind);

    let midnight = NaiveTime::default();
    let full_day = (midnight, NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(midnight));
    let (start_time, end_time) = match (event.schedule.start, event.schedule.end) {
        (Some(start), Some(end)) if start != 0 && end != 0 => {
            let (start, end) = (millis(start)?, millis(end)?);
            periodicity.start_date = Some(start.date_naive());
            periodicity.end_date = Some(end.date_naive());
            (start.time(), end.time())
        }
        _ => full_day,
    };

    if let (Some(days), Some(months), Some(years)) =
        (&event.schedule.day_of_month, &event.schedule.month, &event.schedule.year)
    {
        if let (Some(&day), Some(&month), Some(&year)) = (days.first(), months.first(), years.first()) {
            periodicity.selected_date = selected_date_from_parts(year, month, day);
        }
    }
    periodicity.validate()?;

    let one_time_completion = match data.event_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(_) => Some(kind == PeriodicityType::Once),
    };

    let (timer_type, timer) = match &data.idle_time {
        Some(idle) => {
            let minutes = idle
                .minute
                .as_f64()
                .ok_or_else(|| CadenceError::validation("idleTime.minute is not a number"))?;
            (TimerType::Idle, Some(idle_timer(minutes)?))
        }
        None => (TimerType::NotSet, None),
    };

    let respondent_id = match (event.individualized, data.users.as_ref().and_then(|u| u.first())) {
        (true, Some(user)) => Some(user.to_id()?),
        _ => None,
    };

    let target = if data.is_activity_flow == Some(true) {
        let flow = data
            .activity_flow_id
            .as_ref()
            .ok_or_else(|| CadenceError::validation("activity flow event without activity_flow_id"))?;
        EventTarget::Flow(flow.to_id()?)
    } else {
        let activity = data
            .activity_id
            .as_ref()
            .ok_or_else(|| CadenceError::validation("activity event without activity_id"))?;
        EventTarget::Activity(activity.to_id()?)
    };

    Ok(EventDraft {
        applet_id: event.applet_id.to_id()?,
        start_time,
        end_time,
        access_before_schedule: data.only_scheduled_day,
        one_time_completion,
        timer_type,
        timer,
        periodicity,
        target,
        respondent_id,
        notification: normalize_bundle(translate_notifications(data))?,
    })
}

/// A record the import skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub legacy_id: String,
    pub reason: String,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub skipped: Vec<SkippedRecord>,
}

pub struct LegacyImporter {
    db: Arc<ScheduleDb>,
}

impl LegacyImporter {
    pub fn new(db: Arc<ScheduleDb>) -> Self {
        Self { db }
    }

    /// Parse a JSON array of legacy events.
    pub fn parse(raw: &str) -> Result<Vec<LegacyEvent>> {
        serde_json::from_str(raw).map_err(CadenceError::from)
    }

    /// Import records in order. Integrity and validation failures skip the
    /// record; any other error stops the run, keeping what was committed.
    pub fn run(&self, events: &[LegacyEvent]) -> Result<ImportReport> {
        let mut report = ImportReport { total: events.len(), ..ImportReport::default() };
        for (i, event) in events.iter().enumerate() {
            tracing::debug!("📦 Migrating event {}/{}: {}", i + 1, report.total, event.id);
            let outcome = translate(event).and_then(|draft| self.db.atomic(|tx| store::insert_event(tx, draft)));
            match outcome {
                Ok(_) => report.imported += 1,
                Err(e) if e.is_skippable() => {
                    tracing::warn!("⚠️ Skipped legacy event {}: {e}", event.id);
                    report.skipped.push(SkippedRecord { legacy_id: event.id.to_string(), reason: e.to_string() });
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Legacy import stopped at {} ({} imported): {e}",
                        event.id,
                        report.imported
                    );
                    return Err(e);
                }
            }
        }
        tracing::info!(
            "📥 Legacy import done: {}/{} imported, {} skipped",
            report.imported,
            report.total,
            report.skipped.len()
        );
        Ok(report)
    }
}
