//! Collaborator seams.
//!
//! Cadence does not own applets, users or device push delivery. The scheduling
//! service reaches them only through these traits so the HTTP server, the
//! import tool and tests can each plug in their own implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ActivityId, AppletId, FlowId, Role, UserId};

/// Applet and respondent directory.
pub trait AppletDirectory: Send + Sync {
    /// Whether the applet exists.
    fn applet_exists(&self, applet_id: AppletId) -> Result<bool>;

    /// Resolve a public link key to its applet.
    fn applet_by_link_key(&self, key: &str) -> Result<Option<AppletId>>;

    /// Roles the user holds on the applet (empty when none).
    fn roles(&self, user_id: UserId, applet_id: AppletId) -> Result<Vec<Role>>;

    /// Activity name when the activity belongs to the applet.
    fn activity_name(&self, applet_id: AppletId, activity_id: ActivityId) -> Result<Option<String>>;

    /// Flow name when the flow belongs to the applet.
    fn flow_name(&self, applet_id: AppletId, flow_id: FlowId) -> Result<Option<String>>;

    /// Applets where the user is a respondent.
    fn respondent_applets(&self, user_id: UserId) -> Result<Vec<AppletId>>;

    /// All respondents of an applet.
    fn applet_respondents(&self, applet_id: AppletId) -> Result<Vec<UserId>>;
}

/// Kind of push message, forwarded to the device client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushKind {
    ScheduleUpdated,
}

/// A push notification addressed to an applet's respondents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub applet_id: AppletId,
    pub title: String,
    pub body: String,
    pub kind: PushKind,
    /// `None` addresses every respondent of the applet.
    pub respondent_ids: Option<Vec<UserId>>,
}

impl PushMessage {
    pub const SCHEDULE_CHANGED: &'static str = "Your schedule has been changed, click to update.";

    /// The "schedule changed" message sent after every schedule mutation.
    pub fn schedule_changed(applet_id: AppletId, respondent_ids: Option<Vec<UserId>>) -> Self {
        Self {
            applet_id,
            title: Self::SCHEDULE_CHANGED.to_string(),
            body: Self::SCHEDULE_CHANGED.to_string(),
            kind: PushKind::ScheduleUpdated,
            respondent_ids,
        }
    }
}

/// Push notification transport.
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Deliver one message. Transport failures come back as
    /// [`CadenceError::Dispatch`](crate::error::CadenceError::Dispatch).
    async fn send(&self, message: &PushMessage) -> Result<()>;
}
