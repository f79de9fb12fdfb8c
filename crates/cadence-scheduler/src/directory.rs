//! SQLite-backed applet directory.
//!
//! Applets, their activities and flows, and user roles live in the same
//! database as the schedule so event bindings are checked by foreign keys.
//! The tables are filled from a JSON seed file (`cadence seed`).

use std::sync::Arc;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::AppletDirectory;
use cadence_core::types::{ActivityId, AppletId, FlowId, Role, UserId};
use rusqlite::{OptionalExtension, params};
use serde::Deserialize;

use crate::persistence::{ScheduleDb, db_err};

/// Directory view over a [`ScheduleDb`].
#[derive(Clone)]
pub struct SqliteDirectory {
    db: Arc<ScheduleDb>,
}

impl SqliteDirectory {
    pub fn new(db: Arc<ScheduleDb>) -> Self {
        Self { db }
    }

    fn name_of(&self, sql: &str, applet_id: AppletId, id: i64) -> Result<Option<String>> {
        self.db.read(|conn| {
            conn.query_row(sql, params![id, applet_id], |row| row.get(0))
                .optional()
                .map_err(db_err)
        })
    }

    fn ids(&self, sql: &str, key: i64) -> Result<Vec<i64>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(sql).map_err(db_err)?;
            let ids = stmt
                .query_map(params![key], |row| row.get(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(ids)
        })
    }

    /// Upsert the seed's rows in one transaction.
    pub fn seed(&self, seed: &DirectorySeed) -> Result<()> {
        self.db.atomic(|tx| {
            for applet in &seed.applets {
                let key = applet
                    .link_key
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                tx.execute(
                    "INSERT INTO applets (id, name, link_key) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                         link_key = COALESCE(?4, applets.link_key)",
                    params![applet.id, applet.name, key, applet.link_key],
                )
                .map_err(db_err)?;
            }
            for a in &seed.activities {
                tx.execute(
                    "INSERT INTO activities (id, applet_id, name) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET applet_id = excluded.applet_id, name = excluded.name",
                    params![a.id, a.applet_id, a.name],
                )
                .map_err(db_err)?;
            }
            for f in &seed.flows {
                tx.execute(
                    "INSERT INTO flows (id, applet_id, name) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET applet_id = excluded.applet_id, name = excluded.name",
                    params![f.id, f.applet_id, f.name],
                )
                .map_err(db_err)?;
            }
            for r in &seed.roles {
                tx.execute(
                    "INSERT OR IGNORE INTO applet_roles (applet_id, user_id, role) VALUES (?1, ?2, ?3)",
                    params![r.applet_id, r.user_id, r.role.as_str()],
                )
                .map_err(db_err)?;
            }
            Ok(())
        })?;
        tracing::info!(
            "📇 Directory seeded: {} applets, {} activities, {} flows, {} roles",
            seed.applets.len(),
            seed.activities.len(),
            seed.flows.len(),
            seed.roles.len()
        );
        Ok(())
    }
}

impl AppletDirectory for SqliteDirectory {
    fn applet_exists(&self, applet_id: AppletId) -> Result<bool> {
        self.db.read(|conn| {
            conn.query_row("SELECT 1 FROM applets WHERE id = ?1", params![applet_id], |_| Ok(()))
                .optional()
                .map(|found| found.is_some())
                .map_err(db_err)
        })
    }

    fn applet_by_link_key(&self, key: &str) -> Result<Option<AppletId>> {
        self.db.read(|conn| {
            conn.query_row("SELECT id FROM applets WHERE link_key = ?1", params![key], |row| row.get(0))
                .optional()
                .map_err(db_err)
        })
    }

    fn roles(&self, user_id: UserId, applet_id: AppletId) -> Result<Vec<Role>> {
        self.db.read(|conn| {
            let mut stmt = conn
                .prepare("SELECT role FROM applet_roles WHERE user_id = ?1 AND applet_id = ?2")
                .map_err(db_err)?;
            let raw = stmt
                .query_map(params![user_id, applet_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            let mut roles = Vec::with_capacity(raw.len());
            for name in raw {
                match Role::parse(&name) {
                    Some(role) => roles.push(role),
                    None => tracing::warn!("⚠️ Unknown role '{name}' for user {user_id} in applet {applet_id}"),
                }
            }
            Ok(roles)
        })
    }

    fn activity_name(&self, applet_id: AppletId, activity_id: ActivityId) -> Result<Option<String>> {
        self.name_of("SELECT name FROM activities WHERE id = ?1 AND applet_id = ?2", applet_id, activity_id)
    }

    fn flow_name(&self, applet_id: AppletId, flow_id: FlowId) -> Result<Option<String>> {
        self.name_of("SELECT name FROM flows WHERE id = ?1 AND applet_id = ?2", applet_id, flow_id)
    }

    fn respondent_applets(&self, user_id: UserId) -> Result<Vec<AppletId>> {
        self.ids(
            "SELECT DISTINCT applet_id FROM applet_roles
             WHERE user_id = ?1 AND role = 'respondent' ORDER BY applet_id",
            user_id,
        )
    }

    fn applet_respondents(&self, applet_id: AppletId) -> Result<Vec<UserId>> {
        self.ids(
            "SELECT DISTINCT user_id FROM applet_roles
             WHERE applet_id = ?1 AND role = 'respondent' ORDER BY user_id",
            applet_id,
        )
    }
}

/// Directory content loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub applets: Vec<SeedApplet>,
    #[serde(default)]
    pub activities: Vec<SeedItem>,
    #[serde(default)]
    pub flows: Vec<SeedItem>,
    #[serde(default)]
    pub roles: Vec<SeedRole>,
}

impl DirectorySeed {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(CadenceError::from)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedApplet {
    pub id: AppletId,
    pub name: String,
    /// Public link key; one is generated when omitted.
    #[serde(default)]
    pub link_key: Option<String>,
}

/// An activity or a flow.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedItem {
    pub id: i64,
    pub applet_id: AppletId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRole {
    pub applet_id: AppletId,
    pub user_id: UserId,
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteDirectory {
        let dir = SqliteDirectory::new(Arc::new(ScheduleDb::open_in_memory().unwrap()));
        let seed = DirectorySeed::from_json(
            r#"{
                "applets": [{"id": 1, "name": "Mood", "link_key": "mood-public"}, {"id": 2, "name": "Sleep"}],
                "activities": [{"id": 10, "applet_id": 1, "name": "PHQ-9"}],
                "flows": [{"id": 20, "applet_id": 1, "name": "Morning routine"}],
                "roles": [
                    {"applet_id": 1, "user_id": 100, "role": "owner"},
                    {"applet_id": 1, "user_id": 7, "role": "respondent"},
                    {"applet_id": 2, "user_id": 7, "role": "respondent"}
                ]
            }"#,
        )
        .unwrap();
        dir.seed(&seed).unwrap();
        dir
    }

    #[test]
    fn test_seed_and_lookup() {
        let dir = seeded();
        assert!(dir.applet_exists(1).unwrap());
        assert!(!dir.applet_exists(3).unwrap());
        assert_eq!(dir.applet_by_link_key("mood-public").unwrap(), Some(1));
        assert_eq!(dir.activity_name(1, 10).unwrap().as_deref(), Some("PHQ-9"));
        assert_eq!(dir.activity_name(2, 10).unwrap(), None);
        assert_eq!(dir.flow_name(1, 20).unwrap().as_deref(), Some("Morning routine"));
    }

    #[test]
    fn test_roles_and_respondents() {
        let dir = seeded();
        assert_eq!(dir.roles(100, 1).unwrap(), vec![Role::Owner]);
        assert!(dir.roles(100, 2).unwrap().is_empty());
        assert_eq!(dir.respondent_applets(7).unwrap(), vec![1, 2]);
        assert_eq!(dir.applet_respondents(1).unwrap(), vec![7]);
    }

    #[test]
    fn test_reseed_keeps_generated_link_key() {
        let dir = seeded();
        let key: String = dir
            .db
            .read(|c| c.query_row("SELECT link_key FROM applets WHERE id = 2", [], |r| r.get(0)).map_err(db_err))
            .unwrap();
        assert_eq!(key.len(), 32);

        dir.seed(&DirectorySeed {
            applets: vec![SeedApplet { id: 2, name: "Sleep v2".into(), link_key: None }],
            ..DirectorySeed::default()
        })
        .unwrap();
        assert_eq!(dir.applet_by_link_key(&key).unwrap(), Some(2));
    }
}
