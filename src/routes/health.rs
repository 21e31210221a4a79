use crate::config::Config;
use crate::models::health::HealthResponse;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;

/// Liveness check
#[openapi(tag = "Health")]
#[get("/")]
pub async fn healthcheck(config: &State<Config>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        storage: config.storage.backend.as_str(),
    })
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![healthcheck]
}
