//! Schedule data model: periodicities, events, notifications and reminders.
//!
//! Inbound payloads accept snake_case field names (camelCase aliases where a
//! type is shared with responses); everything the service returns serializes
//! as camelCase.

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{ActivityId, AppletId, EventId, FlowId, UserId};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Recurrence rule type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodicityType {
    Once,
    Daily,
    Weekly,
    Monthly,
    Weekday,
    Always,
}

impl PeriodicityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "ONCE",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Weekday => "WEEKDAY",
            Self::Always => "ALWAYS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONCE" => Some(Self::Once),
            "DAILY" => Some(Self::Daily),
            "WEEKLY" => Some(Self::Weekly),
            "MONTHLY" => Some(Self::Monthly),
            "WEEKDAY" => Some(Self::Weekday),
            "ALWAYS" => Some(Self::Always),
            _ => None,
        }
    }
}

/// When an event is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Periodicity {
    #[serde(rename = "type")]
    pub kind: PeriodicityType,
    #[serde(default, alias = "start_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, alias = "end_date")]
    pub end_date: Option<NaiveDate>,
    /// Day a MONTHLY rule recurs on; ignored by other rule types.
    #[serde(default, alias = "selected_date")]
    pub selected_date: Option<NaiveDate>,
    #[serde(default)]
    pub interval: u32,
}

impl Periodicity {
    /// Unbounded rule of the given type.
    pub fn new(kind: PeriodicityType) -> Self {
        Self {
            kind,
            start_date: None,
            end_date: None,
            selected_date: None,
            interval: 0,
        }
    }

    pub fn always() -> Self {
        Self::new(PeriodicityType::Always)
    }
}

/// Timer attached to an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerType {
    #[default]
    NotSet,
    Timer,
    Idle,
}

impl TimerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSet => "NOT_SET",
            Self::Timer => "TIMER",
            Self::Idle => "IDLE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_SET" => Some(Self::NotSet),
            "TIMER" => Some(Self::Timer),
            "IDLE" => Some(Self::Idle),
            _ => None,
        }
    }
}

/// How a notification's firing time is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Fixed,
    Random,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::Random => "RANDOM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FIXED" => Some(Self::Fixed),
            "RANDOM" => Some(Self::Random),
            _ => None,
        }
    }
}

/// A notification setting as stored. Which time fields are set depends on
/// `trigger_type`; see [`crate::notify::validate_notification`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSetting {
    #[serde(alias = "trigger_type")]
    pub trigger_type: TriggerType,
    #[serde(default, alias = "at_time")]
    pub at_time: Option<NaiveTime>,
    #[serde(default, alias = "from_time")]
    pub from_time: Option<NaiveTime>,
    #[serde(default, alias = "to_time")]
    pub to_time: Option<NaiveTime>,
    #[serde(default)]
    pub order: Option<i64>,
}

impl NotificationSetting {
    pub fn fixed(at: NaiveTime) -> Self {
        Self {
            trigger_type: TriggerType::Fixed,
            at_time: Some(at),
            from_time: None,
            to_time: None,
            order: None,
        }
    }

    pub fn random(from: NaiveTime, to: NaiveTime) -> Self {
        Self {
            trigger_type: TriggerType::Random,
            at_time: None,
            from_time: Some(from),
            to_time: Some(to),
            order: None,
        }
    }
}

/// Reminder for respondents who have not completed the activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    /// Trailing days of non-completion before the reminder fires (0 = every day).
    #[serde(alias = "activity_incomplete")]
    pub activity_incomplete: u32,
    #[serde(alias = "reminder_time")]
    pub reminder_time: NaiveTime,
}

/// Notifications and reminder of one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBundle {
    #[serde(default)]
    pub notifications: Vec<NotificationSetting>,
    #[serde(default)]
    pub reminder: Option<Reminder>,
}

impl NotificationBundle {
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.reminder.is_none()
    }
}

/// What an event makes available. Exactly one per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Activity(ActivityId),
    Flow(FlowId),
}

impl EventTarget {
    /// Build from the optional id pair of a request or row.
    pub fn from_ids(activity_id: Option<ActivityId>, flow_id: Option<FlowId>) -> Result<Self> {
        match (activity_id, flow_id) {
            (Some(a), None) => Ok(Self::Activity(a)),
            (None, Some(f)) => Ok(Self::Flow(f)),
            (Some(_), Some(_)) => Err(CadenceError::validation(
                "an event is bound to either activity_id or flow_id, not both",
            )),
            (None, None) => Err(CadenceError::validation(
                "either activity_id or flow_id is required",
            )),
        }
    }

    pub fn activity_id(&self) -> Option<ActivityId> {
        match self {
            Self::Activity(id) => Some(*id),
            Self::Flow(_) => None,
        }
    }

    pub fn flow_id(&self) -> Option<FlowId> {
        match self {
            Self::Flow(id) => Some(*id),
            Self::Activity(_) => None,
        }
    }
}

/// Create/update payload for an event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub access_before_schedule: Option<bool>,
    #[serde(default)]
    pub one_time_completion: Option<bool>,
    #[serde(default, with = "hms")]
    pub timer: Option<Duration>,
    #[serde(default)]
    pub timer_type: TimerType,
    pub periodicity: Periodicity,
    #[serde(default, alias = "user_id")]
    pub respondent_id: Option<UserId>,
    #[serde(default)]
    pub activity_id: Option<ActivityId>,
    #[serde(default)]
    pub flow_id: Option<FlowId>,
    #[serde(default)]
    pub notification: Option<NotificationBundle>,
}

/// A validated event that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub applet_id: AppletId,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub access_before_schedule: Option<bool>,
    pub one_time_completion: Option<bool>,
    pub timer_type: TimerType,
    pub timer: Option<Duration>,
    pub periodicity: Periodicity,
    pub target: EventTarget,
    pub respondent_id: Option<UserId>,
    pub notification: NotificationBundle,
}

/// A persisted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub applet_id: AppletId,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub access_before_schedule: Option<bool>,
    pub one_time_completion: Option<bool>,
    pub timer_type: TimerType,
    #[serde(with = "hms")]
    pub timer: Option<Duration>,
    #[serde(skip)]
    pub periodicity_id: i64,
    pub periodicity: Periodicity,
    /// `None` for a general (applet default) event.
    pub respondent_id: Option<UserId>,
    pub activity_id: Option<ActivityId>,
    pub flow_id: Option<FlowId>,
    pub notification: NotificationBundle,
}

impl Event {
    pub fn target(&self) -> Option<EventTarget> {
        EventTarget::from_ids(self.activity_id, self.flow_id).ok()
    }

    pub fn is_general(&self) -> bool {
        self.respondent_id.is_none()
    }

    /// Draft that recreates this event, optionally for another respondent.
    pub fn to_draft(&self, respondent_id: Option<UserId>) -> Result<EventDraft> {
        Ok(EventDraft {
            applet_id: self.applet_id,
            start_time: self.start_time,
            end_time: self.end_time,
            access_before_schedule: self.access_before_schedule,
            one_time_completion: self.one_time_completion,
            timer_type: self.timer_type,
            timer: self.timer,
            periodicity: self.periodicity.clone(),
            target: EventTarget::from_ids(self.activity_id, self.flow_id)?,
            respondent_id,
            notification: self.notification.clone(),
        })
    }
}

/// Which respondent binding an event query selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RespondentFilter {
    /// General events only.
    #[default]
    General,
    /// Individual events of one respondent.
    Individual(UserId),
    Any,
}

/// Event listing filter.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub respondent: RespondentFilter,
    pub activity_id: Option<ActivityId>,
    pub flow_id: Option<FlowId>,
}

impl EventFilter {
    pub fn general() -> Self {
        Self::default()
    }

    pub fn individual(respondent_id: UserId) -> Self {
        Self {
            respondent: RespondentFilter::Individual(respondent_id),
            ..Self::default()
        }
    }
}

/// Events visible in one applet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsByApplet {
    pub applet_id: AppletId,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEventCount {
    pub activity_id: ActivityId,
    pub activity_name: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEventCount {
    pub flow_id: FlowId,
    pub flow_name: String,
    pub count: i64,
}

/// Number of events per activity and per flow of an applet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCount {
    pub activity_events: Vec<ActivityEventCount>,
    pub flow_events: Vec<FlowEventCount>,
}

/// Inclusive date window for upcoming-event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingWindow {
    pub min_end_date: NaiveDate,
    pub max_start_date: NaiveDate,
}

/// `"HH:MM:SS"` serde for optional durations.
pub mod hms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(d: Duration) -> String {
        let secs = d.num_seconds().max(0);
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    pub fn parse(s: &str) -> Option<Duration> {
        let mut parts = s.trim().split(':');
        let h: i64 = parts.next()?.parse().ok()?;
        let m: i64 = parts.next()?.parse().ok()?;
        let sec: i64 = match parts.next() {
            Some(p) => p.split('.').next()?.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() || h < 0 || !(0..60).contains(&m) || !(0..60).contains(&sec) {
            return None;
        }
        let total = h.checked_mul(3600)?.checked_add(m * 60 + sec)?;
        Duration::try_seconds(total)
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&format(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid HH:MM:SS duration '{s}'"))),
        }
    }
}
