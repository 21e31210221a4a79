use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::middleware::RequestDeadline;
use crate::models::credential::{CREDENTIAL_ID_LEN, CredentialValidation, InvalidReason};
use crate::service::checkin::CheckinService;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use std::sync::Arc;

/// Check a scanned credential without redeeming it
#[openapi(tag = "Credentials")]
#[get("/<id>/validate")]
pub async fn validate_credential(
    service: &State<Arc<CheckinService>>,
    _current_user: CurrentUser,
    deadline: RequestDeadline,
    id: &str,
) -> Result<Json<CredentialValidation>, AppError> {
    // Malformed ids cannot exist in storage.
    if id.len() != CREDENTIAL_ID_LEN || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Ok(Json(CredentialValidation::invalid(id, None, InvalidReason::Unknown)));
    }

    let validation = service.validate_credential(id, deadline.0).await?;
    Ok(Json(validation))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![validate_credential]
}
