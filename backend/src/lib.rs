//! # RESQ Backend
//!
//! Session service and local HTTP API of a personal-safety SOS companion.
//!
//! ## Design Principles
//!
//! - **Alert first**: an SOS is recorded the instant it triggers; position and
//!   notifications follow asynchronously and can never undo it
//! - **Policy in one place**: every contact mutation goes through `resq-core`
//! - **Local records**: one profile, its contacts and its alert history, kept as
//!   whole JSON records
//! - **Minimal logging**: ids and counts only, never names, phones, PINs or
//!   coordinates
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────────┐
//! │  Client UI  │────▶│  HTTP handlers ─▶ Session    │
//! └─────────────┘ SSE └──────────────┬───────────────┘
//!        ▲                           │
//!        └──── SessionEvent ─────────┤
//!                     ┌──────────────┼──────────────┐
//!                     │              │              │
//!               RecordStore   LocationProvider  NotificationSink
//!             (memory/files)   (fixed/none)        (log)
//! ```
//!
//! ## API Overview
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Health check |
//! | `/v1/profile` | POST / GET / PATCH | Setup / read / edit profile |
//! | `/v1/profile/safety` | PUT | Safety settings |
//! | `/v1/login` | POST | Log in (stored email) |
//! | `/v1/logout` | POST | Log out, remove records |
//! | `/v1/contacts` | GET / POST | List / add contacts |
//! | `/v1/contacts/:id` | PATCH / DELETE | Edit / remove contact |
//! | `/v1/contacts/:id/best-friend` | POST | Toggle best-friend mode |
//! | `/v1/contacts/:id/permissions` | PUT | Set one permission |
//! | `/v1/sos` | GET | Alert state |
//! | `/v1/sos/tap` | POST | Tap: arm countdown / PIN prompt |
//! | `/v1/sos/cancel` | POST | Cancel countdown |
//! | `/v1/sos/press` | POST | Button down (long press) |
//! | `/v1/sos/release` | POST | Button up |
//! | `/v1/sos/resolve` | POST | Resolve with PIN |
//! | `/v1/events` | GET | Alert history |
//! | `/v1/events/:id` | GET | One recorded alert |
//! | `/v1/events/stats` | GET | Dashboard counts |
//! | `/v1/location/share` | POST | One-off position |
//! | `/v1/emergency-numbers` | GET | Quick-dial list |
//! | `/v1/stream` | GET | SSE session events |

pub mod config;
pub mod handlers;
pub mod location;
pub mod models;
pub mod notify;
pub mod session;
pub mod store;

pub use config::Config;
pub use handlers::AppState;
pub use session::{Session, SessionError, SessionEvent, SessionOptions};

use axum::{
    http::{header, Method},
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use store::{FileStore, MemoryStore, RecordStore};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

/// Maximum request body size (16 KiB).
pub const MAX_BODY_SIZE: usize = 16 * 1024;

/// Open the session described by the configuration: file or memory storage,
/// fixed or absent location, log-only notifications.
pub async fn open_session(config: &Config) -> Result<Session, SessionError> {
    let store: Arc<dyn RecordStore> = match &config.data_dir {
        Some(dir) => Arc::new(FileStore::open(dir.clone()).await?),
        None => Arc::new(MemoryStore::new()),
    };

    Session::open(
        store,
        location::from_config(config),
        Arc::new(notify::LogSink),
        SessionOptions::from(config),
    )
    .await
}

/// Build the Axum router with all endpoints and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Profile and account
        .route(
            "/v1/profile",
            post(handlers::setup_profile)
                .get(handlers::get_profile)
                .patch(handlers::update_profile),
        )
        .route("/v1/profile/safety", put(handlers::update_safety_settings))
        .route("/v1/login", post(handlers::login))
        .route("/v1/logout", post(handlers::logout))
        // Contacts
        .route(
            "/v1/contacts",
            get(handlers::list_contacts).post(handlers::add_contact),
        )
        .route(
            "/v1/contacts/:id",
            patch(handlers::update_contact).delete(handlers::remove_contact),
        )
        .route(
            "/v1/contacts/:id/best-friend",
            post(handlers::toggle_best_friend),
        )
        .route("/v1/contacts/:id/permissions", put(handlers::set_permission))
        // SOS
        .route("/v1/sos", get(handlers::sos_state))
        .route("/v1/sos/tap", post(handlers::sos_tap))
        .route("/v1/sos/cancel", post(handlers::sos_cancel))
        .route("/v1/sos/press", post(handlers::sos_press))
        .route("/v1/sos/release", post(handlers::sos_release))
        .route("/v1/sos/resolve", post(handlers::sos_resolve))
        // History
        .route("/v1/events", get(handlers::list_events))
        .route("/v1/events/stats", get(handlers::event_stats))
        .route("/v1/events/:id", get(handlers::get_event))
        // Location / quick dial
        .route("/v1/location/share", post(handlers::share_location))
        .route("/v1/emergency-numbers", get(handlers::emergency_numbers))
        // Live updates
        .route("/v1/stream", get(handlers::session_stream))
        // Middleware stack (order matters: first added = innermost)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::NoLocation;
    use crate::notify::LogSink;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn router() -> Router {
        let session = Session::open(
            Arc::new(MemoryStore::new()),
            Arc::new(NoLocation),
            Arc::new(LogSink),
            SessionOptions::default(),
        )
        .await
        .unwrap();
        build_router(AppState::new(session))
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let body = format!(r#"{{"name":"{}"}}"#, "x".repeat(MAX_BODY_SIZE));
        let request = Request::post("/v1/profile")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap();

        let response = router().await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn cors_preflight_allows_patch() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/contacts/6f1c2a52-93c4-4d5e-8a43-0c9f3c1b2d11")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .body(Body::empty())
            .unwrap();

        let response = router().await.oneshot(request).await.unwrap();

        assert!(response.status().is_success());
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }
}
