//! Notification and reminder rules.
//!
//! The core only persists notification settings. FIXED settings carry a
//! literal time of day; RANDOM settings carry a `[from, to)` window and the
//! delivery system picks the firing time when it dispatches.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::model::{Event, NotificationBundle, NotificationSetting, Reminder, TriggerType};
use cadence_core::error::{CadenceError, Result};
use cadence_core::types::EventId;

/// Check one notification setting against its trigger type.
pub fn validate_notification(setting: &NotificationSetting) -> Result<()> {
    match setting.trigger_type {
        TriggerType::Fixed => {
            if setting.at_time.is_none() {
                return Err(CadenceError::validation("FIXED notification requires at_time"));
            }
        }
        TriggerType::Random => match (setting.from_time, setting.to_time) {
            (Some(from), Some(to)) if from < to => {}
            (Some(from), Some(to)) => {
                return Err(CadenceError::validation(format!(
                    "RANDOM notification window is empty: from_time {from} is not before to_time {to}"
                )));
            }
            _ => {
                return Err(CadenceError::validation(
                    "RANDOM notification requires both from_time and to_time",
                ));
            }
        },
    }
    Ok(())
}

/// Validate every setting and assign a stable order to each notification.
pub fn normalize_bundle(mut bundle: NotificationBundle) -> Result<NotificationBundle> {
    for setting in &bundle.notifications {
        validate_notification(setting)?;
    }
    bundle.notifications.sort_by_key(|n| n.order.unwrap_or(i64::MAX));
    for (i, setting) in bundle.notifications.iter_mut().enumerate() {
        setting.order = Some(i as i64);
    }
    Ok(bundle)
}

impl Reminder {
    /// Whether the reminder should fire on `date` given the respondent's last
    /// completion of the activity.
    ///
    /// Never fires on a day the activity was completed. With
    /// `activity_incomplete == 0` it fires every other day; otherwise the
    /// activity must have gone uncompleted for that many trailing days. A
    /// respondent who never completed it is always due.
    pub fn is_due(&self, date: NaiveDate, last_completed: Option<NaiveDate>) -> bool {
        match last_completed {
            None => true,
            Some(done) if done >= date => false,
            Some(done) => (date - done).num_days() >= i64::from(self.activity_incomplete),
        }
    }
}

/// What fires for one occurrence of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerKind {
    Fixed { at: DateTime<Utc> },
    Window { from: DateTime<Utc>, to: DateTime<Utc> },
    Reminder { at: DateTime<Utc>, activity_incomplete: u32 },
}

/// A concrete trigger derived from an event occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTrigger {
    pub event_id: EventId,
    pub date: NaiveDate,
    pub order: i64,
    #[serde(flatten)]
    pub kind: TriggerKind,
}

fn to_utc(date: NaiveDate, time: NaiveTime, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Derive trigger instants for each occurrence date of an event, reading
/// times of day as the respondent's local time at `offset`. Reminders are
/// planned only on dates where they are due after `last_completed`.
pub fn plan_triggers(
    event: &Event,
    dates: &[NaiveDate],
    offset: &FixedOffset,
    last_completed: Option<NaiveDate>,
) -> Vec<PlannedTrigger> {
    let mut planned = Vec::new();
    for &date in dates {
        for (i, setting) in event.notification.notifications.iter().enumerate() {
            let order = setting.order.unwrap_or(i as i64);
            let kind = match setting.trigger_type {
                TriggerType::Fixed => setting
                    .at_time
                    .and_then(|t| to_utc(date, t, offset))
                    .map(|at| TriggerKind::Fixed { at }),
                TriggerType::Random => match (setting.from_time, setting.to_time) {
                    (Some(from), Some(to)) => to_utc(date, from, offset)
                        .zip(to_utc(date, to, offset))
                        .map(|(from, to)| TriggerKind::Window { from, to }),
                    _ => None,
                },
            };
            if let Some(kind) = kind {
                planned.push(PlannedTrigger { event_id: event.id, date, order, kind });
            }
        }
        if let Some(reminder) = event.notification.reminder.as_ref().filter(|r| r.is_due(date, last_completed)) {
            if let Some(at) = to_utc(date, reminder.reminder_time, offset) {
                planned.push(PlannedTrigger {
                    event_id: event.id,
                    date,
                    order: i64::MAX,
                    kind: TriggerKind::Reminder {
                        at,
                        activity_incomplete: reminder.activity_incomplete,
                    },
                });
            }
        }
    }
    planned
}
