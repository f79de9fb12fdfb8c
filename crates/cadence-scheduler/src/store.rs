//! Event record store: SQL over a connection or an open transaction.
//!
//! Every function takes `&Connection` so callers decide the transaction
//! boundary (a `Transaction` derefs to `Connection`).

use chrono::Duration;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::model::{
    Event, EventDraft, EventFilter, EventTarget, NotificationBundle, NotificationSetting,
    Periodicity, PeriodicityType, Reminder, RespondentFilter, TimerType, TriggerType,
};
use crate::persistence::db_err;
use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{ActivityId, AppletId, EventId, FlowId, UserId};

const EVENT_SELECT: &str = "
    SELECT e.id, e.applet_id, e.start_time, e.end_time,
           e.access_before_schedule, e.one_time_completion,
           e.timer_type, e.timer_secs, e.periodicity_id,
           p.type, p.start_date, p.end_date, p.selected_date, p.recurrence_interval,
           ue.user_id, ae.activity_id, fe.flow_id
    FROM events e
    JOIN periodicity p ON p.id = e.periodicity_id
    LEFT JOIN user_events ue ON ue.event_id = e.id
    LEFT JOIN activity_events ae ON ae.event_id = e.id
    LEFT JOIN flow_events fe ON fe.event_id = e.id";

/// What was removed by [`delete_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedEvent {
    pub id: EventId,
    pub respondent_id: Option<UserId>,
}

fn text_enum<T>(idx: usize, raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unknown value '{raw}'").into())
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let timer_secs: Option<i64> = row.get(7)?;
    let interval: i64 = row.get(13)?;
    Ok(Event {
        id: row.get(0)?,
        applet_id: row.get(1)?,
        start_time: row.get(2)?,
        end_time: row.get(3)?,
        access_before_schedule: row.get(4)?,
        one_time_completion: row.get(5)?,
        timer_type: text_enum(6, row.get(6)?, TimerType::parse)?,
        timer: timer_secs.and_then(Duration::try_seconds),
        periodicity_id: row.get(8)?,
        periodicity: Periodicity {
            kind: text_enum(9, row.get(9)?, PeriodicityType::parse)?,
            start_date: row.get(10)?,
            end_date: row.get(11)?,
            selected_date: row.get(12)?,
            interval: u32::try_from(interval).unwrap_or(0),
        },
        respondent_id: row.get(14)?,
        activity_id: row.get(15)?,
        flow_id: row.get(16)?,
        notification: NotificationBundle::default(),
    })
}

fn load_bundle(conn: &Connection, event_id: EventId) -> Result<NotificationBundle> {
    let mut stmt = conn
        .prepare(
            "SELECT trigger_type, at_time, from_time, to_time, sort_order
             FROM notifications WHERE event_id = ?1 ORDER BY sort_order, id",
        )
        .map_err(db_err)?;
    let notifications = stmt
        .query_map(params![event_id], |row| {
            Ok(NotificationSetting {
                trigger_type: text_enum(0, row.get(0)?, TriggerType::parse)?,
                at_time: row.get(1)?,
                from_time: row.get(2)?,
                to_time: row.get(3)?,
                order: row.get(4)?,
            })
        })
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;

    let reminder = conn
        .query_row(
            "SELECT activity_incomplete, reminder_time FROM reminders WHERE event_id = ?1",
            params![event_id],
            |row| {
                let days: i64 = row.get(0)?;
                Ok(Reminder {
                    activity_incomplete: u32::try_from(days).unwrap_or(0),
                    reminder_time: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(db_err)?;

    Ok(NotificationBundle { notifications, reminder })
}

fn with_bundles(conn: &Connection, mut events: Vec<Event>) -> Result<Vec<Event>> {
    for event in &mut events {
        event.notification = load_bundle(conn, event.id)?;
    }
    Ok(events)
}

fn insert_periodicity(conn: &Connection, p: &Periodicity) -> Result<i64> {
    conn.execute(
        "INSERT INTO periodicity (type, start_date, end_date, selected_date, recurrence_interval)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![p.kind.as_str(), p.start_date, p.end_date, p.selected_date, i64::from(p.interval)],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

/// Write the target, respondent, notification and reminder rows of an event.
fn write_links(conn: &Connection, event_id: EventId, draft: &EventDraft) -> Result<()> {
    match draft.target {
        EventTarget::Activity(activity_id) => conn.execute(
            "INSERT INTO activity_events (event_id, activity_id) VALUES (?1, ?2)",
            params![event_id, activity_id],
        ),
        EventTarget::Flow(flow_id) => conn.execute(
            "INSERT INTO flow_events (event_id, flow_id) VALUES (?1, ?2)",
            params![event_id, flow_id],
        ),
    }
    .map_err(db_err)?;

    if let Some(user_id) = draft.respondent_id {
        conn.execute(
            "INSERT INTO user_events (event_id, user_id) VALUES (?1, ?2)",
            params![event_id, user_id],
        )
        .map_err(db_err)?;
    }

    for (i, n) in draft.notification.notifications.iter().enumerate() {
        conn.execute(
            "INSERT INTO notifications (event_id, trigger_type, at_time, from_time, to_time, sort_order)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event_id,
                n.trigger_type.as_str(),
                n.at_time,
                n.from_time,
                n.to_time,
                n.order.unwrap_or(i as i64)
            ],
        )
        .map_err(db_err)?;
    }

    if let Some(reminder) = &draft.notification.reminder {
        conn.execute(
            "INSERT INTO reminders (event_id, activity_incomplete, reminder_time) VALUES (?1, ?2, ?3)",
            params![event_id, i64::from(reminder.activity_incomplete), reminder.reminder_time],
        )
        .map_err(db_err)?;
    }
    Ok(())
}

fn draft_to_event(id: EventId, periodicity_id: i64, draft: EventDraft) -> Event {
    Event {
        id,
        applet_id: draft.applet_id,
        start_time: draft.start_time,
        end_time: draft.end_time,
        access_before_schedule: draft.access_before_schedule,
        one_time_completion: draft.one_time_completion,
        timer_type: draft.timer_type,
        timer: draft.timer,
        periodicity_id,
        periodicity: draft.periodicity,
        respondent_id: draft.respondent_id,
        activity_id: draft.target.activity_id(),
        flow_id: draft.target.flow_id(),
        notification: draft.notification,
    }
}

/// Persist a draft with its periodicity, bindings and notifications.
pub fn insert_event(conn: &Connection, draft: EventDraft) -> Result<Event> {
    let periodicity_id = insert_periodicity(conn, &draft.periodicity)?;
    conn.execute(
        "INSERT INTO events (applet_id, periodicity_id, start_time, end_time,
                             access_before_schedule, one_time_completion, timer_type, timer_secs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            draft.applet_id,
            periodicity_id,
            draft.start_time,
            draft.end_time,
            draft.access_before_schedule,
            draft.one_time_completion,
            draft.timer_type.as_str(),
            draft.timer.map(|t| t.num_seconds())
        ],
    )
    .map_err(db_err)?;
    let id = conn.last_insert_rowid();
    write_links(conn, id, &draft)?;
    Ok(draft_to_event(id, periodicity_id, draft))
}

pub fn get_event(conn: &Connection, applet_id: AppletId, event_id: EventId) -> Result<Option<Event>> {
    let sql = format!("{EVENT_SELECT} WHERE e.applet_id = ?1 AND e.id = ?2");
    let event = conn
        .query_row(&sql, params![applet_id, event_id], row_to_event)
        .optional()
        .map_err(db_err)?;
    match event {
        Some(mut event) => {
            event.notification = load_bundle(conn, event.id)?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

/// Events of an applet matching `filter`, oldest first.
pub fn list_events(conn: &Connection, applet_id: AppletId, filter: &EventFilter) -> Result<Vec<Event>> {
    let mut sql = format!("{EVENT_SELECT} WHERE e.applet_id = ?");
    let mut values = vec![Value::Integer(applet_id)];
    match filter.respondent {
        RespondentFilter::General => sql.push_str(" AND ue.user_id IS NULL"),
        RespondentFilter::Individual(user_id) => {
            sql.push_str(" AND ue.user_id = ?");
            values.push(Value::Integer(user_id));
        }
        RespondentFilter::Any => {}
    }
    if let Some(activity_id) = filter.activity_id {
        sql.push_str(" AND ae.activity_id = ?");
        values.push(Value::Integer(activity_id));
    }
    if let Some(flow_id) = filter.flow_id {
        sql.push_str(" AND fe.flow_id = ?");
        values.push(Value::Integer(flow_id));
    }
    sql.push_str(" ORDER BY e.id");

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let events = stmt
        .query_map(params_from_iter(values.iter()), row_to_event)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    with_bundles(conn, events)
}

fn delete_rows(conn: &Connection, rows: &[(EventId, i64)]) -> Result<()> {
    for (event_id, periodicity_id) in rows {
        conn.execute("DELETE FROM events WHERE id = ?1", params![event_id])
            .map_err(db_err)?;
        conn.execute("DELETE FROM periodicity WHERE id = ?1", params![periodicity_id])
            .map_err(db_err)?;
    }
    Ok(())
}

fn select_rows(conn: &Connection, sql: &str, args: &[i64]) -> Result<Vec<(EventId, i64)>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Delete one event and its periodicity. `None` when the event is not in the applet.
pub fn delete_event(conn: &Connection, applet_id: AppletId, event_id: EventId) -> Result<Option<DeletedEvent>> {
    let found = conn
        .query_row(
            "SELECT e.periodicity_id, ue.user_id FROM events e
             LEFT JOIN user_events ue ON ue.event_id = e.id
             WHERE e.applet_id = ?1 AND e.id = ?2",
            params![applet_id, event_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<UserId>>(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((periodicity_id, respondent_id)) = found else {
        return Ok(None);
    };
    delete_rows(conn, &[(event_id, periodicity_id)])?;
    Ok(Some(DeletedEvent { id: event_id, respondent_id }))
}

/// Delete the applet's general events. Returns how many were removed.
pub fn delete_general_events(conn: &Connection, applet_id: AppletId) -> Result<usize> {
    let rows = select_rows(
        conn,
        "SELECT e.id, e.periodicity_id FROM events e
         LEFT JOIN user_events ue ON ue.event_id = e.id
         WHERE e.applet_id = ?1 AND ue.user_id IS NULL",
        &[applet_id],
    )?;
    delete_rows(conn, &rows)?;
    Ok(rows.len())
}

/// Delete one respondent's individual events in an applet.
pub fn delete_respondent_events(conn: &Connection, applet_id: AppletId, respondent_id: UserId) -> Result<usize> {
    let rows = select_rows(
        conn,
        "SELECT e.id, e.periodicity_id FROM events e
         JOIN user_events ue ON ue.event_id = e.id
         WHERE e.applet_id = ?1 AND ue.user_id = ?2",
        &[applet_id, respondent_id],
    )?;
    delete_rows(conn, &rows)?;
    Ok(rows.len())
}

/// Rewrite an event from a draft: fresh periodicity, relinked bindings,
/// re-derived notifications. The old periodicity is removed.
pub fn replace_event(conn: &Connection, event_id: EventId, draft: EventDraft) -> Result<Event> {
    let old_periodicity: i64 = conn
        .query_row(
            "SELECT periodicity_id FROM events WHERE id = ?1 AND applet_id = ?2",
            params![event_id, draft.applet_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| CadenceError::not_found(format!("event {event_id}")))?;

    let periodicity_id = insert_periodicity(conn, &draft.periodicity)?;
    conn.execute(
        "UPDATE events SET periodicity_id = ?1, start_time = ?2, end_time = ?3,
             access_before_schedule = ?4, one_time_completion = ?5,
             timer_type = ?6, timer_secs = ?7, updated_at = datetime('now')
         WHERE id = ?8",
        params![
            periodicity_id,
            draft.start_time,
            draft.end_time,
            draft.access_before_schedule,
            draft.one_time_completion,
            draft.timer_type.as_str(),
            draft.timer.map(|t| t.num_seconds()),
            event_id
        ],
    )
    .map_err(db_err)?;
    conn.execute("DELETE FROM periodicity WHERE id = ?1", params![old_periodicity])
        .map_err(db_err)?;

    for table in ["activity_events", "flow_events", "user_events", "notifications", "reminders"] {
        conn.execute(&format!("DELETE FROM {table} WHERE event_id = ?1"), params![event_id])
            .map_err(db_err)?;
    }
    write_links(conn, event_id, &draft)?;
    Ok(draft_to_event(event_id, periodicity_id, draft))
}

/// General event counts per activity of the applet.
pub fn count_by_activity(conn: &Connection, applet_id: AppletId) -> Result<Vec<(ActivityId, i64)>> {
    count_grouped(
        conn,
        "SELECT ae.activity_id, COUNT(*) FROM activity_events ae
         JOIN events e ON e.id = ae.event_id
         LEFT JOIN user_events ue ON ue.event_id = e.id
         WHERE e.applet_id = ?1 AND ue.user_id IS NULL
         GROUP BY ae.activity_id ORDER BY ae.activity_id",
        applet_id,
    )
}

/// General event counts per flow of the applet.
pub fn count_by_flow(conn: &Connection, applet_id: AppletId) -> Result<Vec<(FlowId, i64)>> {
    count_grouped(
        conn,
        "SELECT fe.flow_id, COUNT(*) FROM flow_events fe
         JOIN events e ON e.id = fe.event_id
         LEFT JOIN user_events ue ON ue.event_id = e.id
         WHERE e.applet_id = ?1 AND ue.user_id IS NULL
         GROUP BY fe.flow_id ORDER BY fe.flow_id",
        applet_id,
    )
}

fn count_grouped(conn: &Connection, sql: &str, applet_id: AppletId) -> Result<Vec<(i64, i64)>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let counts = stmt
        .query_map(params![applet_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::ScheduleDb;
    use chrono::{NaiveDate, NaiveTime};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn setup() -> ScheduleDb {
        let db = ScheduleDb::open_in_memory().unwrap();
        db.atomic(|tx| {
            tx.execute_batch(
                "INSERT INTO applets (id, name) VALUES (1, 'Sleep diary');
                 INSERT INTO activities (id, applet_id, name) VALUES (1, 1, 'Morning'), (2, 1, 'Evening');
                 INSERT INTO flows (id, applet_id, name) VALUES (1, 1, 'Daily check');",
            )
            .map_err(db_err)
        })
        .unwrap();
        db
    }

    fn draft(target: EventTarget, respondent_id: Option<UserId>) -> EventDraft {
        EventDraft {
            applet_id: 1,
            start_time: t(8, 0),
            end_time: t(9, 0),
            access_before_schedule: Some(false),
            one_time_completion: None,
            timer_type: TimerType::Timer,
            timer: Some(Duration::minutes(20)),
            periodicity: Periodicity {
                kind: PeriodicityType::Weekly,
                start_date: NaiveDate::from_ymd_opt(2021, 9, 1),
                end_date: NaiveDate::from_ymd_opt(2021, 9, 1),
                selected_date: None,
                interval: 4,
            },
            target,
            respondent_id,
            notification: NotificationBundle {
                notifications: vec![NotificationSetting::random(t(8, 0), t(8, 30))],
                reminder: Some(Reminder { activity_incomplete: 2, reminder_time: t(20, 0) }),
            },
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup();
        let created = db.atomic(|tx| insert_event(tx, draft(EventTarget::Activity(1), None))).unwrap();
        let loaded = db.read(|c| get_event(c, 1, created.id)).unwrap().unwrap();
        assert_eq!(loaded.start_time, t(8, 0));
        assert_eq!(loaded.periodicity, created.periodicity);
        assert_eq!(loaded.timer, Some(Duration::minutes(20)));
        assert_eq!(loaded.access_before_schedule, Some(false));
        assert_eq!(loaded.one_time_completion, None);
        assert_eq!(loaded.activity_id, Some(1));
        assert_eq!(loaded.notification.notifications.len(), 1);
        assert_eq!(loaded.notification.reminder.as_ref().unwrap().activity_incomplete, 2);
    }

    #[test]
    fn test_get_wrong_applet_is_none() {
        let db = setup();
        let created = db.atomic(|tx| insert_event(tx, draft(EventTarget::Flow(1), None))).unwrap();
        assert!(db.read(|c| get_event(c, 2, created.id)).unwrap().is_none());
    }

    #[test]
    fn test_unknown_activity_is_integrity_error() {
        let db = setup();
        let err = db
            .atomic(|tx| insert_event(tx, draft(EventTarget::Activity(99), None)))
            .unwrap_err();
        assert!(matches!(err, CadenceError::Integrity(_)));
        let left: i64 = db
            .read(|c| c.query_row("SELECT COUNT(*) FROM periodicity", [], |r| r.get(0)).map_err(db_err))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn test_list_filters() {
        let db = setup();
        db.atomic(|tx| {
            insert_event(tx, draft(EventTarget::Activity(1), None))?;
            insert_event(tx, draft(EventTarget::Flow(1), None))?;
            insert_event(tx, draft(EventTarget::Activity(2), Some(7)))?;
            Ok(())
        })
        .unwrap();

        let general = db.read(|c| list_events(c, 1, &EventFilter::general())).unwrap();
        assert_eq!(general.len(), 2);
        let individual = db.read(|c| list_events(c, 1, &EventFilter::individual(7))).unwrap();
        assert_eq!(individual.len(), 1);
        assert_eq!(individual[0].respondent_id, Some(7));

        let filter = EventFilter { respondent: RespondentFilter::Any, activity_id: Some(2), flow_id: None };
        assert_eq!(db.read(|c| list_events(c, 1, &filter)).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_event_removes_periodicity() {
        let db = setup();
        let created = db.atomic(|tx| insert_event(tx, draft(EventTarget::Activity(1), Some(7)))).unwrap();
        let deleted = db.atomic(|tx| delete_event(tx, 1, created.id)).unwrap();
        assert_eq!(deleted, Some(DeletedEvent { id: created.id, respondent_id: Some(7) }));
        assert!(db.atomic(|tx| delete_event(tx, 1, created.id)).unwrap().is_none());

        let (periodicities, reminders): (i64, i64) = db
            .read(|c| {
                c.query_row(
                    "SELECT (SELECT COUNT(*) FROM periodicity), (SELECT COUNT(*) FROM reminders)",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .map_err(db_err)
            })
            .unwrap();
        assert_eq!((periodicities, reminders), (0, 0));
    }

    #[test]
    fn test_delete_general_keeps_individual() {
        let db = setup();
        db.atomic(|tx| {
            insert_event(tx, draft(EventTarget::Activity(1), None))?;
            insert_event(tx, draft(EventTarget::Activity(1), Some(7)))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.atomic(|tx| delete_general_events(tx, 1)).unwrap(), 1);
        let all = EventFilter { respondent: RespondentFilter::Any, ..EventFilter::default() };
        let left = db.read(|c| list_events(c, 1, &all)).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].respondent_id, Some(7));
        assert_eq!(db.atomic(|tx| delete_respondent_events(tx, 1, 7)).unwrap(), 1);
    }

    #[test]
    fn test_replace_event_relinks() {
        let db = setup();
        let created = db.atomic(|tx| insert_event(tx, draft(EventTarget::Activity(1), None))).unwrap();
        let mut next = draft(EventTarget::Flow(1), Some(7));
        next.start_time = t(10, 0);
        next.periodicity = Periodicity::always();
        next.notification = NotificationBundle::default();
        let updated = db.atomic(|tx| replace_event(tx, created.id, next)).unwrap();
        assert_eq!(updated.id, created.id);
        assert_ne!(updated.periodicity_id, created.periodicity_id);

        let loaded = db.read(|c| get_event(c, 1, created.id)).unwrap().unwrap();
        assert_eq!(loaded.start_time, t(10, 0));
        assert_eq!(loaded.flow_id, Some(1));
        assert_eq!(loaded.activity_id, None);
        assert_eq!(loaded.respondent_id, Some(7));
        assert!(loaded.notification.is_empty());
        assert_eq!(loaded.periodicity.kind, PeriodicityType::Always);
    }

    #[test]
    fn test_counts_skip_individual_events() {
        let db = setup();
        db.atomic(|tx| {
            insert_event(tx, draft(EventTarget::Activity(1), None))?;
            insert_event(tx, draft(EventTarget::Activity(1), None))?;
            insert_event(tx, draft(EventTarget::Flow(1), None))?;
            insert_event(tx, draft(EventTarget::Flow(1), Some(9)))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(db.read(|c| count_by_activity(c, 1)).unwrap(), vec![(1, 2)]);
        assert_eq!(db.read(|c| count_by_flow(c, 1)).unwrap(), vec![(1, 1)]);
    }
}
