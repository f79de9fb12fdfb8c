//! End-to-end schedule scenarios over an in-memory database.

use std::sync::Arc;

use cadence_core::config::ScheduleConfig;
use cadence_core::error::CadenceError;
use cadence_scheduler::{
    DirectorySeed, EventRequest, LegacyImporter, PushQueue, ScheduleDb, ScheduleQuery,
    ScheduleService, SqliteDirectory, TimerType,
};
use chrono::Duration;
use serde_json::json;

const OWNER: i64 = 1;
const RESPONDENT: i64 = 2;

fn setup() -> (Arc<ScheduleDb>, ScheduleService) {
    let db = Arc::new(ScheduleDb::open_in_memory().unwrap());
    let directory = SqliteDirectory::new(db.clone());
    let seed: DirectorySeed = serde_json::from_value(json!({
        "applets": [{"id": 10, "name": "Wellbeing", "link_key": "wellbeing"}],
        "activities": [{"id": 1, "applet_id": 10, "name": "PHQ-9"}],
        "flows": [{"id": 1, "applet_id": 10, "name": "Morning"}],
        "roles": [
            {"applet_id": 10, "user_id": OWNER, "role": "owner"},
            {"applet_id": 10, "user_id": RESPONDENT, "role": "respondent"}
        ]
    }))
    .unwrap();
    directory.seed(&seed).unwrap();
    let service = ScheduleService::new(
        db.clone(),
        Arc::new(directory),
        PushQueue::disabled(),
        ScheduleConfig::default(),
    );
    (db, service)
}

fn weekly(activity_id: Option<i64>, flow_id: Option<i64>, respondent_id: Option<i64>) -> EventRequest {
    serde_json::from_value(json!({
        "start_time": "08:00:00",
        "end_time": "09:00:00",
        "access_before_schedule": false,
        "one_time_completion": false,
        "timer": "00:00:00",
        "timer_type": "NOT_SET",
        "periodicity": {
            "type": "WEEKLY",
            "start_date": "2021-09-01",
            "end_date": "2021-09-01",
            "interval": 4
        },
        "respondent_id": respondent_id,
        "activity_id": activity_id,
        "flow_id": flow_id
    }))
    .unwrap()
}

#[test]
fn create_then_get_round_trips() {
    let (_, service) = setup();
    let created = service.create_schedule(OWNER, 10, weekly(Some(1), None, None)).unwrap();
    let json = serde_json::to_value(&created).unwrap();
    assert_eq!(json["startTime"], "08:00:00");

    let loaded = service.get_schedule_by_id(OWNER, 10, created.id).unwrap();
    assert_eq!(loaded.start_time, created.start_time);
    assert_eq!(loaded.end_time, created.end_time);
    assert_eq!(loaded.periodicity, created.periodicity);
}

#[test]
fn binding_must_be_activity_xor_flow() {
    let (_, service) = setup();
    let both = service.create_schedule(OWNER, 10, weekly(Some(1), Some(1), None));
    let neither = service.create_schedule(OWNER, 10, weekly(None, None, None));
    assert!(matches!(both, Err(CadenceError::Validation(_))));
    assert!(matches!(neither, Err(CadenceError::Validation(_))));
}

#[test]
fn counts_one_activity_and_one_flow() {
    let (_, service) = setup();
    service.create_schedule(OWNER, 10, weekly(Some(1), None, None)).unwrap();
    service.create_schedule(OWNER, 10, weekly(None, Some(1), None)).unwrap();
    let count = service.count_schedules(OWNER, 10).unwrap();
    assert_eq!(count.activity_events[0].count, 1);
    assert_eq!(count.flow_events[0].count, 1);
}

#[test]
fn deleting_unknown_event_is_not_found() {
    let (_, service) = setup();
    let err = service.delete_schedule_by_id(OWNER, 10, 404).unwrap_err();
    assert!(matches!(err, CadenceError::NotFound(_)));
}

#[test]
fn delete_by_user_id_brings_back_general_events() {
    let (_, service) = setup();
    service.create_schedule(OWNER, 10, weekly(Some(1), None, None)).unwrap();
    service.create_schedule(OWNER, 10, weekly(Some(1), None, Some(RESPONDENT))).unwrap();

    let before = service.get_events_by_user_and_applet(RESPONDENT, 10).unwrap();
    assert_eq!(before.events.len(), 1);
    assert_eq!(before.events[0].respondent_id, Some(RESPONDENT));

    service.delete_by_user_id(OWNER, 10, RESPONDENT).unwrap();
    let after = service.get_events_by_user_and_applet(RESPONDENT, 10).unwrap();
    assert_eq!(after.events.len(), 1);
    assert!(after.events.iter().all(|e| e.respondent_id.is_none()));

    let individual = service
        .get_all_schedules(OWNER, 10, &ScheduleQuery { respondent_id: Some(RESPONDENT) })
        .unwrap();
    assert!(individual.is_empty());
}

#[test]
fn legacy_events_are_visible_through_the_service() {
    let (db, service) = setup();
    let events = LegacyImporter::parse(
        &json!([{
            "_id": "5f0e35523a64ca0e6da2ae01",
            "applet_id": "00000000000000000000000a",
            "individualized": true,
            "data": {
                "activity_id": "000000000000000000000001",
                "eventType": "DAILY",
                "idleTime": {"allow": true, "minute": 5},
                "users": ["000000000000000000000002"]
            },
            "schedule": {}
        }])
        .to_string(),
    )
    .unwrap();
    let report = LegacyImporter::new(db).run(&events).unwrap();
    assert_eq!(report.imported, 1);

    let visible = service.get_events_by_user_and_applet(RESPONDENT, 10).unwrap();
    assert_eq!(visible.events.len(), 1);
    let event = &visible.events[0];
    assert_eq!(event.timer_type, TimerType::Idle);
    assert_eq!(event.timer, Some(Duration::minutes(5)));
    assert_eq!(event.respondent_id, Some(RESPONDENT));
}
