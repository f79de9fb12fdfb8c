//! # Cadence Core
//!
//! Shared building blocks for the Cadence scheduling service:
//! - [`error`]: the error taxonomy every crate returns
//! - [`config`]: TOML configuration
//! - [`types`]: identifiers and workspace roles
//! - [`traits`]: seams to the collaborators Cadence does not own
//!   (applet directory, push delivery)

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use traits::{AppletDirectory, PushDispatcher, PushKind, PushMessage};
pub use types::{ActivityId, AppletId, EventId, FlowId, Role, UserId};
