use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, catch};

/// Body for failures Rocket resolves before a handler runs, shaped like `AppError` bodies.
#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub error: &'static str,
    pub message: String,
}

fn error(kind: &'static str, message: &str) -> Json<Error> {
    Json(Error {
        error: kind,
        message: message.to_string(),
    })
}

#[catch(400)]
pub fn bad_request(_: &Request) -> Json<Error> {
    error("invalid_argument", "Bad request")
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    error("unauthorized", "Authentication required")
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    error("not_found", "Not found")
}

#[catch(409)]
pub fn conflict(_: &Request) -> Json<Error> {
    error("invalid_state", "Conflict")
}

#[catch(422)]
pub fn unprocessable(_: &Request) -> Json<Error> {
    error("invalid_argument", "Malformed request body")
}

#[catch(429)]
pub fn too_many_requests(_: &Request) -> Json<Error> {
    error("throttled", "Too many requests")
}

#[catch(503)]
pub fn service_unavailable(_: &Request) -> Json<Error> {
    error("store_unavailable", "Storage unavailable")
}
