//! # Cadence Gateway
//!
//! HTTP/JSON API over the schedule service. Responses are
//! `{"ok": true, "result": ...}`; errors are `{"ok": false, "error": "..."}`.
//! Every route except `/health` and `/public/...` needs an `X-User-Id` header.

pub mod routes;
pub mod server;

pub use server::{Actor, AppState, build_router, start};
