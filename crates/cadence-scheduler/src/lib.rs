//! # Cadence Scheduler
//!
//! Recurring-event scheduling engine for applet activities and flows.
//! SQLite persistence, one transaction per mutation.
//!
//! ## Architecture
//! ```text
//! ScheduleService
//!   ├── build_draft → EventTarget (activity XOR flow), Periodicity::validate,
//!   │                 notify::normalize_bundle
//!   ├── store (events, periodicity, bindings, notifications, reminders)
//!   │     └── ScheduleDb::atomic → SQLite
//!   ├── AppletDirectory (roles, activity/flow names, respondents)
//!   └── PushQueue → worker → PushDispatcher
//!                              ├── WebhookDispatcher (HTTP POST)
//!                              └── LogDispatcher
//!
//! LegacyImporter
//!   └── legacy JSON → translate → store (one transaction per record)
//! ```

pub mod directory;
pub mod dispatch;
pub mod legacy;
pub mod model;
pub mod notify;
pub mod periodicity;
pub mod persistence;
pub mod queue;
pub mod service;
pub mod store;

pub use directory::{DirectorySeed, SqliteDirectory};
pub use dispatch::{LogDispatcher, WebhookDispatcher, dispatcher_from_config};
pub use legacy::{ImportReport, LegacyEvent, LegacyImporter};
pub use model::{
    Event, EventCount, EventDraft, EventFilter, EventRequest, EventTarget, EventsByApplet,
    NotificationBundle, NotificationSetting, Periodicity, PeriodicityType, Reminder, TimerType,
    TriggerType, UpcomingWindow,
};
pub use notify::{PlannedTrigger, TriggerKind};
pub use persistence::ScheduleDb;
pub use queue::{DispatchFailure, PushQueue, QueueStats};
pub use service::{ScheduleQuery, ScheduleService};
