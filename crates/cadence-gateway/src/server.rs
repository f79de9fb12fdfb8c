//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use cadence_core::config::{CadenceConfig, GatewayConfig};
use cadence_core::types::UserId;
use cadence_scheduler::{
    PushQueue, ScheduleDb, ScheduleService, SqliteDirectory, dispatcher_from_config,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Header carrying the acting user's id. Authentication happens upstream.
pub const USER_HEADER: &str = "X-User-Id";

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScheduleService>,
    pub config: GatewayConfig,
    pub start_time: std::time::Instant,
}

/// The user a request acts as, taken from [`USER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub UserId);

/// Actor middleware: rejects requests without a numeric `X-User-Id`.
async fn require_user(mut req: Request<Body>, next: Next) -> Response {
    let actor = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<UserId>().ok());

    match actor {
        Some(id) => {
            req.extensions_mut().insert(Actor(id));
            next.run(req).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"ok": false, "error": "Unauthorized: missing or invalid X-User-Id header"})),
        )
            .into_response(),
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Protected routes: require an acting user
    let protected = Router::new()
        .route(
            "/applets/{applet_id}/events",
            post(routes::create_event)
                .get(routes::list_events)
                .delete(routes::delete_all_events),
        )
        .route("/applets/{applet_id}/events/count", get(routes::count_events))
        .route("/applets/{applet_id}/events/import", post(routes::import_events))
        .route(
            "/applets/{applet_id}/events/{event_id}",
            get(routes::get_event)
                .put(routes::update_event)
                .delete(routes::delete_event),
        )
        .route(
            "/applets/{applet_id}/events/delete_individual/{respondent_id}",
            delete(routes::delete_user_events),
        )
        .route(
            "/applets/{applet_id}/events/individual/{respondent_id}",
            post(routes::create_individual_events).delete(routes::remove_individual_calendar),
        )
        // Respondent views
        .route("/users/me/events", get(routes::my_events))
        .route("/users/me/events/upcoming", get(routes::my_upcoming_events))
        .route("/users/me/events/triggers", get(routes::my_triggers))
        .route("/users/me/events/{applet_id}", get(routes::my_applet_events))
        .route_layer(axum::middleware::from_fn(require_user));

    // Public routes: no auth
    let public = Router::new()
        .route("/health", get(routes::health_check))
        .route("/public/applets/{key}/events", get(routes::public_events));

    let router = protected.merge(public);
    let router = if shared.config.cors {
        router.layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any)
                .max_age(std::time::Duration::from_secs(3600)),
        )
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(shared)
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("⚠️ Could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown requested");
}

/// Open the database, start the push queue and serve until Ctrl-C.
pub async fn start(config: &CadenceConfig) -> anyhow::Result<()> {
    let db_path = config.database.resolved_path();
    let db = Arc::new(ScheduleDb::open(&db_path)?);
    tracing::info!("💾 Schedule DB opened: {}", db_path.display());

    let (push, worker) = if config.push.enabled {
        let dispatcher = dispatcher_from_config(&config.push);
        let (queue, handle) = PushQueue::start(dispatcher, config.push.queue_capacity);
        (queue, Some(handle))
    } else {
        tracing::info!("🔕 Push notifications disabled");
        (PushQueue::disabled(), None)
    };

    let directory = Arc::new(SqliteDirectory::new(db.clone()));
    let service = ScheduleService::new(db, directory, push.clone(), config.schedule.clone());
    let state = AppState {
        service: Arc::new(service),
        config: config.gateway.clone(),
        start_time: std::time::Instant::now(),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    push.shutdown();
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            tracing::warn!("⚠️ Push worker ended abnormally: {e}");
        }
    }
    Ok(())
}
