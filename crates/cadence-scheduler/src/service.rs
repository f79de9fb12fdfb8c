//! Schedule service: event lifecycle orchestration.
//!
//! Mutations check the applet and the actor's schedule-management role, run
//! in one transaction, then enqueue a "schedule changed" push. Push problems
//! are logged by the queue and never reach the caller.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use cadence_core::config::ScheduleConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{AppletDirectory, PushMessage};
use cadence_core::types::{AppletId, EventId, Role, UserId};
use chrono::{Duration, FixedOffset, NaiveDate};
use rusqlite::Connection;
use serde::Deserialize;

use crate::model::{
    ActivityEventCount, Event, EventCount, EventDraft, EventFilter, EventRequest, EventTarget,
    EventsByApplet, FlowEventCount, TimerType, UpcomingWindow,
};
use crate::notify::{PlannedTrigger, normalize_bundle, plan_triggers};
use crate::persistence::ScheduleDb;
use crate::queue::PushQueue;
use crate::store;

/// Listing options for [`ScheduleService::get_all_schedules`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleQuery {
    /// Individual events of this respondent; general events when absent.
    #[serde(default, alias = "respondentId")]
    pub respondent_id: Option<UserId>,
}

pub struct ScheduleService {
    db: Arc<ScheduleDb>,
    directory: Arc<dyn AppletDirectory>,
    push: PushQueue,
    window: ScheduleConfig,
}

impl ScheduleService {
    pub fn new(
        db: Arc<ScheduleDb>,
        directory: Arc<dyn AppletDirectory>,
        push: PushQueue,
        window: ScheduleConfig,
    ) -> Self {
        Self { db, directory, push, window }
    }

    pub fn push(&self) -> &PushQueue {
        &self.push
    }

    // ── Guards ────────────────────────────────────────────

    fn ensure_applet(&self, applet_id: AppletId) -> Result<()> {
        if self.directory.applet_exists(applet_id)? {
            Ok(())
        } else {
            Err(CadenceError::not_found(format!("applet {applet_id}")))
        }
    }

    fn ensure_schedule_access(&self, actor: UserId, applet_id: AppletId) -> Result<()> {
        self.ensure_applet(applet_id)?;
        let roles = self.directory.roles(actor, applet_id)?;
        if roles.iter().any(Role::can_manage_schedule) {
            Ok(())
        } else {
            Err(CadenceError::no_permission(format!(
                "user {actor} cannot manage schedules of applet {applet_id}"
            )))
        }
    }

    fn is_respondent(&self, user_id: UserId, applet_id: AppletId) -> Result<bool> {
        Ok(self.directory.roles(user_id, applet_id)?.contains(&Role::Respondent))
    }

    fn ensure_respondent(&self, respondent_id: UserId, applet_id: AppletId) -> Result<()> {
        if self.is_respondent(respondent_id, applet_id)? {
            Ok(())
        } else {
            Err(CadenceError::validation(format!(
                "user {respondent_id} is not a respondent of applet {applet_id}"
            )))
        }
    }

    /// Validate a request into a draft bound to `applet_id`.
    pub fn build_draft(&self, applet_id: AppletId, request: EventRequest) -> Result<EventDraft> {
        let target = EventTarget::from_ids(request.activity_id, request.flow_id)?;
        let known = match target {
            EventTarget::Activity(id) => self.directory.activity_name(applet_id, id)?.is_some(),
            EventTarget::Flow(id) => self.directory.flow_name(applet_id, id)?.is_some(),
        };
        if !known {
            return Err(CadenceError::validation(format!("{target:?} does not belong to applet {applet_id}")));
        }

        request.periodicity.validate()?;
        if matches!(request.timer_type, TimerType::Timer | TimerType::Idle) && request.timer.is_none() {
            return Err(CadenceError::validation(format!(
                "timer_type {} requires a timer",
                request.timer_type.as_str()
            )));
        }
        if let Some(respondent_id) = request.respondent_id {
            self.ensure_respondent(respondent_id, applet_id)?;
        }

        Ok(EventDraft {
            applet_id,
            start_time: request.start_time,
            end_time: request.end_time,
            access_before_schedule: request.access_before_schedule,
            one_time_completion: request.one_time_completion,
            timer_type: request.timer_type,
            timer: request.timer,
            periodicity: request.periodicity,
            target,
            respondent_id: request.respondent_id,
            notification: normalize_bundle(request.notification.unwrap_or_default())?,
        })
    }

    /// Tell the affected respondent, or every respondent of the applet for a
    /// general event, that their schedule changed.
    fn notify_changed(&self, applet_id: AppletId, respondent_id: Option<UserId>) {
        let respondents = match respondent_id {
            Some(id) => vec![id],
            None => match self.directory.applet_respondents(applet_id) {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!("⚠️ Could not resolve respondents of applet {applet_id}: {e}");
                    return;
                }
            },
        };
        if respondents.is_empty() {
            tracing::debug!("🔕 Applet {applet_id} has no respondents to notify");
            return;
        }
        self.push.enqueue(PushMessage::schedule_changed(applet_id, Some(respondents)));
    }

    // ── Mutations ─────────────────────────────────────────

    pub fn create_schedule(&self, actor: UserId, applet_id: AppletId, request: EventRequest) -> Result<Event> {
        self.ensure_schedule_access(actor, applet_id)?;
        let draft = self.build_draft(applet_id, request)?;
        let event = self.db.atomic(|tx| store::insert_event(tx, draft))?;
        tracing::info!(
            "📅 Event {} created in applet {} ({})",
            event.id,
            applet_id,
            event.periodicity.kind.as_str()
        );
        self.notify_changed(applet_id, event.respondent_id);
        Ok(event)
    }

    pub fn update_schedule(
        &self,
        actor: UserId,
        applet_id: AppletId,
        event_id: EventId,
        request: EventRequest,
    ) -> Result<Event> {
        self.ensure_schedule_access(actor, applet_id)?;
        let draft = self.build_draft(applet_id, request)?;
        let (previous, event) = self.db.atomic(|tx| {
            let previous = store::get_event(tx, applet_id, event_id)?
                .ok_or_else(|| CadenceError::not_found(format!("event {event_id}")))?;
            let event = store::replace_event(tx, event_id, draft)?;
            Ok((previous, event))
        })?;
        tracing::info!("📅 Event {event_id} updated in applet {applet_id}");
        self.notify_changed(applet_id, event.respondent_id);
        if previous.respondent_id != event.respondent_id {
            self.notify_changed(applet_id, previous.respondent_id);
        }
        Ok(event)
    }

    pub fn delete_schedule_by_id(&self, actor: UserId, applet_id: AppletId, event_id: EventId) -> Result<()> {
        self.ensure_schedule_access(actor, applet_id)?;
        let deleted = self
            .db
            .atomic(|tx| store::delete_event(tx, applet_id, event_id))?
            .ok_or_else(|| CadenceError::not_found(format!("event {event_id}")))?;
        tracing::info!("🗑️ Event {event_id} deleted from applet {applet_id}");
        self.notify_changed(applet_id, deleted.respondent_id);
        Ok(())
    }

    /// Remove the applet's general events. Individual events stay.
    pub fn delete_all_schedules(&self, actor: UserId, applet_id: AppletId) -> Result<usize> {
        self.ensure_schedule_access(actor, applet_id)?;
        let removed = self.db.atomic(|tx| store::delete_general_events(tx, applet_id))?;
        tracing::info!("🗑️ {removed} general event(s) deleted from applet {applet_id}");
        self.notify_changed(applet_id, None);
        Ok(removed)
    }

    /// Remove a respondent's individual events. Fails with NotFound when the
    /// respondent has none; general events apply to them again afterwards.
    pub fn delete_by_user_id(&self, actor: UserId, applet_id: AppletId, respondent_id: UserId) -> Result<usize> {
        self.ensure_schedule_access(actor, applet_id)?;
        let removed = self.db.atomic(|tx| {
            let removed = store::delete_respondent_events(tx, applet_id, respondent_id)?;
            if removed == 0 {
                return Err(CadenceError::not_found(format!(
                    "no individual events for respondent {respondent_id} in applet {applet_id}"
                )));
            }
            Ok(removed)
        })?;
        tracing::info!("🗑️ {removed} individual event(s) of respondent {respondent_id} deleted from applet {applet_id}");
        self.notify_changed(applet_id, Some(respondent_id));
        Ok(removed)
    }

    /// Same as [`Self::delete_by_user_id`] but succeeds when there is nothing to remove.
    pub fn remove_individual_calendar(&self, actor: UserId, applet_id: AppletId, respondent_id: UserId) -> Result<usize> {
        self.ensure_schedule_access(actor, applet_id)?;
        let removed = self
            .db
            .atomic(|tx| store::delete_respondent_events(tx, applet_id, respondent_id))?;
        if removed > 0 {
            tracing::info!("🗑️ Individual calendar of respondent {respondent_id} removed from applet {applet_id}");
            self.notify_changed(applet_id, Some(respondent_id));
        }
        Ok(removed)
    }

    /// Give a respondent an individual copy of each general event. Targets the
    /// respondent already has individual events for are left alone.
    pub fn create_schedule_individual(
        &self,
        actor: UserId,
        applet_id: AppletId,
        respondent_id: UserId,
    ) -> Result<Vec<Event>> {
        self.ensure_schedule_access(actor, applet_id)?;
        self.ensure_respondent(respondent_id, applet_id)?;
        let created = self.db.atomic(|tx| {
            let own: HashSet<_> = store::list_events(tx, applet_id, &EventFilter::individual(respondent_id))?
                .iter()
                .filter_map(Event::target)
                .collect();
            let mut created = Vec::new();
            for general in store::list_events(tx, applet_id, &EventFilter::general())? {
                if general.target().is_some_and(|t| own.contains(&t)) {
                    continue;
                }
                created.push(store::insert_event(tx, general.to_draft(Some(respondent_id))?)?);
            }
            Ok(created)
        })?;
        tracing::info!(
            "📅 {} individual event(s) created for respondent {respondent_id} in applet {applet_id}",
            created.len()
        );
        if !created.is_empty() {
            self.notify_changed(applet_id, Some(respondent_id));
        }
        Ok(created)
    }

    /// Create many events at once. Any invalid request aborts the whole import.
    pub fn import_schedule(&self, actor: UserId, applet_id: AppletId, requests: Vec<EventRequest>) -> Result<Vec<Event>> {
        self.ensure_schedule_access(actor, applet_id)?;
        let drafts = requests
            .into_iter()
            .map(|r| self.build_draft(applet_id, r))
            .collect::<Result<Vec<_>>>()?;
        let events = self.db.atomic(|tx| {
            drafts
                .into_iter()
                .map(|d| store::insert_event(tx, d))
                .collect::<Result<Vec<_>>>()
        })?;
        tracing::info!("📥 Imported {} event(s) into applet {applet_id}", events.len());

        let respondents: BTreeSet<_> = events.iter().filter_map(|e| e.respondent_id).collect();
        if events.iter().any(Event::is_general) {
            self.notify_changed(applet_id, None);
        }
        for respondent_id in respondents {
            self.notify_changed(applet_id, Some(respondent_id));
        }
        Ok(events)
    }

    // ── Manager reads ─────────────────────────────────────

    pub fn get_schedule_by_id(&self, actor: UserId, applet_id: AppletId, event_id: EventId) -> Result<Event> {
        self.ensure_schedule_access(actor, applet_id)?;
        self.db
            .read(|conn| store::get_event(conn, applet_id, event_id))?
            .ok_or_else(|| CadenceError::not_found(format!("event {event_id}")))
    }

    pub fn get_all_schedules(&self, actor: UserId, applet_id: AppletId, query: &ScheduleQuery) -> Result<Vec<Event>> {
        self.ensure_schedule_access(actor, applet_id)?;
        let filter = match query.respondent_id {
            Some(id) => EventFilter::individual(id),
            None => EventFilter::general(),
        };
        self.db.read(|conn| store::list_events(conn, applet_id, &filter))
    }

    pub fn count_schedules(&self, actor: UserId, applet_id: AppletId) -> Result<EventCount> {
        self.ensure_schedule_access(actor, applet_id)?;
        let (by_activity, by_flow) = self.db.read(|conn| {
            Ok((store::count_by_activity(conn, applet_id)?, store::count_by_flow(conn, applet_id)?))
        })?;

        let mut count = EventCount::default();
        for (activity_id, n) in by_activity {
            count.activity_events.push(ActivityEventCount {
                activity_id,
                activity_name: self.directory.activity_name(applet_id, activity_id)?.unwrap_or_default(),
                count: n,
            });
        }
        for (flow_id, n) in by_flow {
            count.flow_events.push(FlowEventCount {
                flow_id,
                flow_name: self.directory.flow_name(applet_id, flow_id)?.unwrap_or_default(),
                count: n,
            });
        }
        Ok(count)
    }

    /// Public read of an applet's general schedule by link key.
    pub fn get_public_schedule(&self, link_key: &str) -> Result<EventsByApplet> {
        let applet_id = self
            .directory
            .applet_by_link_key(link_key)?
            .ok_or_else(|| CadenceError::not_found("public applet link"))?;
        let events = self
            .db
            .read(|conn| store::list_events(conn, applet_id, &EventFilter::general()))?;
        Ok(EventsByApplet { applet_id, events })
    }

    // ── Respondent reads ──────────────────────────────────

    /// The respondent's individual events plus every general event whose
    /// activity or flow they have no individual event for.
    fn visible_events(conn: &Connection, applet_id: AppletId, respondent_id: UserId) -> Result<Vec<Event>> {
        let mut events = store::list_events(conn, applet_id, &EventFilter::individual(respondent_id))?;
        let overridden: HashSet<EventTarget> = events.iter().filter_map(Event::target).collect();
        let general = store::list_events(conn, applet_id, &EventFilter::general())?;
        events.extend(
            general
                .into_iter()
                .filter(|e| e.target().is_none_or(|t| !overridden.contains(&t))),
        );
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    pub fn get_events_by_user_and_applet(&self, respondent_id: UserId, applet_id: AppletId) -> Result<EventsByApplet> {
        self.ensure_applet(applet_id)?;
        if !self.is_respondent(respondent_id, applet_id)? {
            return Err(CadenceError::no_permission(format!(
                "user {respondent_id} is not a respondent of applet {applet_id}"
            )));
        }
        let events = self
            .db
            .read(|conn| Self::visible_events(conn, applet_id, respondent_id))?;
        Ok(EventsByApplet { applet_id, events })
    }

    pub fn get_events_by_user(&self, respondent_id: UserId) -> Result<Vec<EventsByApplet>> {
        let applets = self.directory.respondent_applets(respondent_id)?;
        self.db.read(|conn| {
            applets
                .into_iter()
                .map(|applet_id| {
                    Ok(EventsByApplet { applet_id, events: Self::visible_events(conn, applet_id, respondent_id)? })
                })
                .collect()
        })
    }

    pub fn count_events_by_user(&self, respondent_id: UserId) -> Result<usize> {
        Ok(self
            .get_events_by_user(respondent_id)?
            .iter()
            .map(|a| a.events.len())
            .sum())
    }

    /// Default window around `today` for upcoming-event queries.
    pub fn upcoming_window(&self, today: NaiveDate) -> UpcomingWindow {
        UpcomingWindow {
            min_end_date: today - Duration::days(self.window.past_days),
            max_start_date: today + Duration::days(self.window.upcoming_days),
        }
    }

    /// Visible events occurring inside `window`, per applet the respondent
    /// belongs to. `applet_ids` narrows the applets when given.
    pub fn get_upcoming_events_by_user(
        &self,
        respondent_id: UserId,
        applet_ids: Option<&[AppletId]>,
        window: UpcomingWindow,
    ) -> Result<Vec<EventsByApplet>> {
        let mut applets = self.directory.respondent_applets(respondent_id)?;
        if let Some(wanted) = applet_ids {
            applets.retain(|id| wanted.contains(id));
        }
        let result = self.db.read(|conn| {
            let mut result = Vec::with_capacity(applets.len());
            for applet_id in applets {
                let events: Vec<_> = Self::visible_events(conn, applet_id, respondent_id)?
                    .into_iter()
                    .filter(|e| e.periodicity.intersects(window.min_end_date, window.max_start_date))
                    .collect();
                result.push(EventsByApplet { applet_id, events });
            }
            Ok(result)
        })?;
        tracing::debug!(
            "🔎 Upcoming events for respondent {respondent_id}: {} applet(s) in {}..{}",
            result.len(),
            window.min_end_date,
            window.max_start_date
        );
        Ok(result)
    }

    /// Notification and reminder instants from `today` to the end of the
    /// upcoming window, ordered by date. `last_completed` holds the
    /// respondent's latest completion date per event and gates reminders.
    pub fn upcoming_triggers(
        &self,
        respondent_id: UserId,
        today: NaiveDate,
        offset: FixedOffset,
        last_completed: &HashMap<EventId, NaiveDate>,
    ) -> Result<Vec<PlannedTrigger>> {
        let window = self.upcoming_window(today);
        let mut planned = Vec::new();
        for applet in self.get_upcoming_events_by_user(respondent_id, None, window)? {
            for event in &applet.events {
                let dates: Vec<_> = event.periodicity.occurrences(today, window.max_start_date).collect();
                planned.extend(plan_triggers(event, &dates, &offset, last_completed.get(&event.id).copied()));
            }
        }
        planned.sort_by(|a, b| a.date.cmp(&b.date).then(a.order.cmp(&b.order)));
        Ok(planned)
    }
}
