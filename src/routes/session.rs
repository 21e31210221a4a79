use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::middleware::RequestDeadline;
use crate::models::credential::{CredentialResponse, IssueCredentialRequest};
use crate::models::redemption::RedemptionResponse;
use crate::models::session::{NewSession, SessionRequest, SessionResponse};
use crate::routes::parse_uuid;
use crate::service::checkin::CheckinService;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use std::sync::Arc;
use validator::Validate;

/// Open a class or meal session owned by the caller
#[openapi(tag = "Sessions")]
#[post("/", data = "<payload>")]
pub async fn open_session(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    payload: Json<SessionRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    payload.validate()?;

    let request = NewSession::from_request(current_user.id, payload.into_inner());
    let session = service.open_session(request, deadline.0).await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// Close a session. Its credentials stop validating immediately.
#[openapi(tag = "Sessions")]
#[post("/<id>/close")]
pub async fn close_session(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    id: &str,
) -> Result<Json<SessionResponse>, AppError> {
    let session_id = parse_uuid(id, "session")?;
    let session = service.close_session(&session_id, &current_user.id, deadline.0).await?;
    Ok(Json(SessionResponse::from(&session)))
}

/// Issue a fresh credential (with QR code) for a session
#[openapi(tag = "Sessions")]
#[post("/<id>/credentials", data = "<payload>")]
pub async fn issue_credential(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    id: &str,
    payload: Json<IssueCredentialRequest>,
) -> Result<Json<CredentialResponse>, AppError> {
    payload.validate()?;

    let session_id = parse_uuid(id, "session")?;
    let (credential, qr_code) = service.issue_credential(&session_id, &current_user.id, payload.ttl_minutes, deadline.0).await?;
    Ok(Json(CredentialResponse::new(&credential, qr_code)))
}

/// List every redemption recorded for a session (owner only)
#[openapi(tag = "Sessions")]
#[get("/<id>/redemptions")]
pub async fn session_roster(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    id: &str,
) -> Result<Json<Vec<RedemptionResponse>>, AppError> {
    let session_id = parse_uuid(id, "session")?;
    let records = service.session_roster(&session_id, &current_user.id, deadline.0).await?;
    Ok(Json(records.iter().map(RedemptionResponse::from).collect()))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![open_session, close_session, issue_credential, session_roster]
}
