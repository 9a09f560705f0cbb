//! HTTP request handlers for the RESQ API.
//!
//! Handlers are thin: each one forwards to a [`Session`] operation and maps
//! the result. Logging of personal data (names, phones, PINs, coordinates) is
//! never done here.

use crate::models::*;
use crate::session::{Session, SessionError};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        FromRequest, FromRequestParts, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::Stream;
use resq_core::{
    AlertState, ContactDraft, ContactId, ContactPartial, Coordinates, EventId, EventStats,
    LocationError, ProfileSetup, ProfileUpdate, SafetySettings, SosEvent,
};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Session,
}

impl AppState {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// JSON body extractor whose rejection uses the API error contract
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

/// Path extractor whose rejection uses the API error contract
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct AppPath<T>(pub T);

// === Health Check ===

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        core_version: resq_core::VERSION,
    })
}

// === Profile ===

/// POST /v1/profile - Complete signup and profile setup
pub async fn setup_profile(
    State(state): State<AppState>,
    AppJson(req): AppJson<ProfileSetup>,
) -> ApiResult<ProfileView> {
    let profile = state.session.setup_profile(req).await?;
    Ok(Json(profile.into()))
}

/// GET /v1/profile - Active profile
pub async fn get_profile(State(state): State<AppState>) -> ApiResult<ProfileView> {
    Ok(Json(state.session.profile().await?.into()))
}

/// PATCH /v1/profile - Edit name, address, cosmetics and optionally the SOS PIN
pub async fn update_profile(
    State(state): State<AppState>,
    AppJson(req): AppJson<ProfileUpdate>,
) -> ApiResult<ProfileView> {
    let profile = state.session.update_profile(req).await?;
    Ok(Json(profile.into()))
}

/// PUT /v1/profile/safety - Replace safety settings
pub async fn update_safety_settings(
    State(state): State<AppState>,
    AppJson(req): AppJson<SafetySettings>,
) -> ApiResult<ProfileView> {
    let profile = state.session.update_safety_settings(req).await?;
    Ok(Json(profile.into()))
}

// === Account ===

/// POST /v1/login - Log in with the stored profile's email
pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> ApiResult<ProfileView> {
    let profile = state.session.login(&req.email).await?;
    Ok(Json(profile.into()))
}

/// POST /v1/logout - Log out and remove the stored records
pub async fn logout(State(state): State<AppState>) -> ApiResult<LogoutResponse> {
    state.session.logout().await?;
    Ok(Json(LogoutResponse { success: true }))
}

// === Contacts ===

/// GET /v1/contacts - Contact list
pub async fn list_contacts(State(state): State<AppState>) -> ApiResult<Vec<ContactView>> {
    let is_minor = state.session.is_minor().await?;
    let contacts = state.session.contacts().await?;
    Ok(Json(
        contacts
            .into_iter()
            .map(|c| ContactView::new(c, is_minor))
            .collect(),
    ))
}

/// POST /v1/contacts - Add a contact
pub async fn add_contact(
    State(state): State<AppState>,
    AppJson(req): AppJson<ContactDraft>,
) -> Result<(StatusCode, Json<ContactView>), ApiError> {
    let contact = state.session.add_contact(req).await?;
    let is_minor = state.session.is_minor().await?;
    info!(contact_id = %contact.id, best_friend = contact.is_best_friend, "Contact added");
    Ok((StatusCode::CREATED, Json(ContactView::new(contact, is_minor))))
}

/// PATCH /v1/contacts/:id - Partial edit
pub async fn update_contact(
    State(state): State<AppState>,
    AppPath(id): AppPath<ContactId>,
    AppJson(req): AppJson<ContactPartial>,
) -> ApiResult<ContactView> {
    let contact = state.session.update_contact(id, req).await?;
    let is_minor = state.session.is_minor().await?;
    Ok(Json(ContactView::new(contact, is_minor)))
}

/// DELETE /v1/contacts/:id - Remove a contact
pub async fn remove_contact(
    State(state): State<AppState>,
    AppPath(id): AppPath<ContactId>,
) -> ApiResult<ContactView> {
    let contact = state.session.remove_contact(id).await?;
    let is_minor = state.session.is_minor().await?;
    info!(contact_id = %id, "Contact removed");
    Ok(Json(ContactView::new(contact, is_minor)))
}

/// POST /v1/contacts/:id/best-friend - Toggle best-friend mode
pub async fn toggle_best_friend(
    State(state): State<AppState>,
    AppPath(id): AppPath<ContactId>,
) -> ApiResult<ContactView> {
    let contact = state.session.toggle_best_friend(id).await?;
    let is_minor = state.session.is_minor().await?;
    Ok(Json(ContactView::new(contact, is_minor)))
}

/// PUT /v1/contacts/:id/permissions - Set one permission
pub async fn set_permission(
    State(state): State<AppState>,
    AppPath(id): AppPath<ContactId>,
    AppJson(req): AppJson<PermissionUpdateRequest>,
) -> ApiResult<ContactView> {
    let contact = state
        .session
        .set_permission(id, req.permission, req.enabled)
        .await?;
    let is_minor = state.session.is_minor().await?;
    Ok(Json(ContactView::new(contact, is_minor)))
}

// === SOS ===

/// GET /v1/sos - Current alert state
pub async fn sos_state(State(state): State<AppState>) -> Json<AlertState> {
    Json(state.session.alert_state().await)
}

/// POST /v1/sos/tap - Short tap on the SOS button
pub async fn sos_tap(State(state): State<AppState>) -> ApiResult<TapResponse> {
    let outcome = state.session.tap().await?;
    let alert = state.session.alert_state().await;
    Ok(Json(TapResponse::new(outcome, alert)))
}

/// POST /v1/sos/cancel - Cancel an armed countdown
pub async fn sos_cancel(State(state): State<AppState>) -> ApiResult<CancelResponse> {
    let outcome = state.session.cancel_arming().await?;
    let alert = state.session.alert_state().await;
    Ok(Json(CancelResponse::new(outcome, alert)))
}

/// POST /v1/sos/press - SOS button went down
pub async fn sos_press(State(state): State<AppState>) -> ApiResult<PressResponse> {
    let pending = state.session.press_start().await?;
    Ok(Json(PressResponse { pending }))
}

/// POST /v1/sos/release - SOS button came up
pub async fn sos_release(State(state): State<AppState>) -> ApiResult<ReleaseResponse> {
    let released = state.session.press_release().await?;
    Ok(Json(ReleaseResponse { released }))
}

/// POST /v1/sos/resolve - Answer the PIN prompt of the active alert
pub async fn sos_resolve(
    State(state): State<AppState>,
    AppJson(req): AppJson<ResolveRequest>,
) -> ApiResult<ResolveResponse> {
    let outcome = state.session.resolve(req.pin.as_deref()).await?;
    let alert = state.session.alert_state().await;
    Ok(Json(ResolveResponse::new(outcome, alert)))
}

// === History ===

/// GET /v1/events - Alert history, most recent first
pub async fn list_events(State(state): State<AppState>) -> ApiResult<Vec<SosEvent>> {
    Ok(Json(state.session.events().await?))
}

/// GET /v1/events/:id - One recorded alert
pub async fn get_event(
    State(state): State<AppState>,
    AppPath(id): AppPath<EventId>,
) -> ApiResult<SosEvent> {
    Ok(Json(state.session.event(id).await?))
}

/// GET /v1/events/stats - Dashboard counts
pub async fn event_stats(State(state): State<AppState>) -> ApiResult<EventStats> {
    Ok(Json(state.session.stats().await?))
}

// === Location / quick dial ===

/// POST /v1/location/share - One-off position
pub async fn share_location(State(state): State<AppState>) -> ApiResult<Coordinates> {
    Ok(Json(state.session.share_location().await?))
}

/// GET /v1/emergency-numbers - Quick-dial list
pub async fn emergency_numbers() -> Json<&'static [EmergencyNumber]> {
    Json(&EMERGENCY_NUMBERS)
}

// === SSE Session Stream ===

/// GET /v1/stream - Server-Sent Events stream of session changes
pub async fn session_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("SSE client connected");

    let rx = state.session.subscribe();

    // Lagged receivers skip what they missed
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        let event = result.ok()?;
        let json = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().data(json)))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

// === Error Handling ===

/// API error: a session error or an unreadable request, rendered as JSON
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    /// Body or path parameter that could not be parsed
    BadRequest(String),
    /// Body over the configured size limit
    PayloadTooLarge,
}

/// Implement From<SessionError> to enable ? operator in handlers
impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge,
            _ => ApiError::BadRequest(rejection.body_text()),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use resq_core::Error as Domain;

        let err = match self {
            ApiError::Session(err) => err,
            ApiError::BadRequest(message) => {
                let body = Json(ErrorResponse {
                    error: message,
                    code: "VALIDATION_ERROR",
                    fields: None,
                    reason: None,
                });
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            ApiError::PayloadTooLarge => {
                let body = Json(ErrorResponse {
                    error: "request body too large".to_string(),
                    code: "PAYLOAD_TOO_LARGE",
                    fields: None,
                    reason: None,
                });
                return (StatusCode::PAYLOAD_TOO_LARGE, body).into_response();
            }
        };

        let message = err.to_string();
        let mut fields = None;
        let mut reason = None;

        let (status, code) = match err {
            SessionError::Domain(err) => {
                let status = match &err {
                    Domain::Validation(list) => {
                        fields = Some(list.clone());
                        StatusCode::BAD_REQUEST
                    }
                    Domain::ContactNotFound(_) | Domain::EventNotFound(_) => StatusCode::NOT_FOUND,
                    Domain::Locked(why) => {
                        reason = Some(*why);
                        StatusCode::CONFLICT
                    }
                    Domain::InvalidPin => StatusCode::FORBIDDEN,
                    Domain::NotActive | Domain::EventClosed { .. } => StatusCode::CONFLICT,
                };
                (status, err.code())
            }
            SessionError::NoProfile => (StatusCode::UNAUTHORIZED, "NO_SESSION"),
            SessionError::AccountNotFound => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            SessionError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            SessionError::Location(LocationError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "LOCATION_TIMEOUT")
            }
            SessionError::Location(_) => (StatusCode::SERVICE_UNAVAILABLE, "LOCATION_UNAVAILABLE"),
            SessionError::Store(e) => {
                error!(error = %e, "Storage failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            code,
            fields,
            reason,
        });

        (status, body).into_response()
    }
}
