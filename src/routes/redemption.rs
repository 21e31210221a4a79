use crate::auth::CurrentUser;
use crate::error::app_error::AppError;
use crate::middleware::RequestDeadline;
use crate::models::redemption::{RedeemRequest, RedemptionFilter, RedemptionResponse, RedemptionStats, RedemptionStatus};
use crate::routes::parse_day;
use crate::service::checkin::CheckinService;
use crate::service::redemption::RedeemCommand;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use std::sync::Arc;
use validator::Validate;

/// Redeem a scanned credential for the caller
#[openapi(tag = "Redemptions")]
#[post("/", data = "<payload>")]
pub async fn redeem(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    payload: Json<RedeemRequest>,
) -> Result<Json<RedemptionResponse>, AppError> {
    payload.validate()?;

    let request = payload.into_inner();
    let command = RedeemCommand {
        credential_id: request.credential_id,
        subject_id: current_user.id,
        observed_at: request.observed_at,
        location_claim: request.location_claim,
    };
    let record = service.redeem(&command, deadline.0).await?;
    Ok(Json(RedemptionResponse::from(&record)))
}

/// The caller's redemption history, newest first
#[openapi(tag = "Redemptions")]
#[get("/?<from>&<to>&<status>&<limit>")]
pub async fn list_redemptions(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    from: Option<String>,
    to: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
) -> Result<Json<Vec<RedemptionResponse>>, AppError> {
    let status = status
        .as_deref()
        .map(|raw| RedemptionStatus::from_db(raw).ok_or_else(|| AppError::InvalidArgument(format!("Unknown status '{}'", raw))))
        .transpose()?;
    let filter = RedemptionFilter {
        from: parse_day(from.as_deref(), "from")?,
        to: parse_day(to.as_deref(), "to")?,
        status,
        limit: limit.unwrap_or_default(),
    };

    let records = service.list_redemptions(&current_user.id, &filter, deadline.0).await?;
    Ok(Json(records.iter().map(RedemptionResponse::from).collect()))
}

/// Counts of the caller's redemptions by status
#[openapi(tag = "Redemptions")]
#[get("/stats?<from>&<to>")]
pub async fn redemption_stats(
    service: &State<Arc<CheckinService>>,
    current_user: CurrentUser,
    deadline: RequestDeadline,
    from: Option<String>,
    to: Option<String>,
) -> Result<Json<RedemptionStats>, AppError> {
    let filter = RedemptionFilter {
        from: parse_day(from.as_deref(), "from")?,
        to: parse_day(to.as_deref(), "to")?,
        ..Default::default()
    };

    let stats = service.redemption_stats(&current_user.id, &filter, deadline.0).await?;
    Ok(Json(stats))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![redeem, list_redemptions, redemption_stats]
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{TestApp, at};
    use rocket::http::{ContentType, Status};
    use serde_json::{Value, json};

    #[rocket::async_test]
    async fn redeem_then_duplicate_then_history() {
        let app = TestApp::new(at(9, 50)).await;
        let owner = app.login().await;
        let student = app.login().await;
        let session = app.open_session(&owner).await;
        let credential_id = app.issue(&owner, &session.id, 30).await;

        app.clock.set(at(10, 5));
        let response = app
            .client
            .post("/api/v1/redemptions")
            .header(ContentType::JSON)
            .private_cookie(student.cookie())
            .body(json!({ "credential_id": credential_id, "location_claim": "Row 3" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let record: Value = response.into_json().await.expect("redemption json");
        assert_eq!(record["status"], "present");
        assert_eq!(record["subject_id"], student.user_id.to_string());
        assert_eq!(record["day"], "2026-03-02");

        app.clock.set(at(10, 6));
        let response = app
            .client
            .post("/api/v1/redemptions")
            .header(ContentType::JSON)
            .private_cookie(student.cookie())
            .body(json!({ "credential_id": credential_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);
        let body: Value = response.into_json().await.expect("error json");
        assert_eq!(body["error"], "duplicate_redemption");
        assert_eq!(body["retryable"], false);

        let response = app.client.get("/api/v1/redemptions?status=present").private_cookie(student.cookie()).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let history: Value = response.into_json().await.expect("history json");
        assert_eq!(history.as_array().map(Vec::len), Some(1));

        let response = app.client.get("/api/v1/redemptions/stats").private_cookie(student.cookie()).dispatch().await;
        let stats: Value = response.into_json().await.expect("stats json");
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["by_status"]["present"], 1);

        let response = app
            .client
            .get(format!("/api/v1/sessions/{}/redemptions", session.id))
            .private_cookie(owner.cookie())
            .dispatch()
            .await;
        let roster: Value = response.into_json().await.expect("roster json");
        assert_eq!(roster.as_array().map(Vec::len), Some(1));
    }

    #[rocket::async_test]
    async fn rapid_retry_is_throttled_with_retry_after() {
        let app = TestApp::new(at(9, 50)).await;
        let owner = app.login().await;
        let student = app.login().await;
        let session = app.open_session(&owner).await;
        let credential_id = app.issue(&owner, &session.id, 30).await;

        let unknown = "a".repeat(64);
        let response = app
            .client
            .post("/api/v1/redemptions")
            .header(ContentType::JSON)
            .private_cookie(student.cookie())
            .body(json!({ "credential_id": unknown }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.expect("error json");
        assert_eq!(body["reason"], "unknown");

        let response = app
            .client
            .post("/api/v1/redemptions")
            .header(ContentType::JSON)
            .private_cookie(student.cookie())
            .body(json!({ "credential_id": credential_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::TooManyRequests);
        assert_eq!(response.headers().get_one("Retry-After"), Some("30"));
    }

    #[rocket::async_test]
    async fn bad_query_values_are_rejected() {
        let app = TestApp::new(at(9, 50)).await;
        let student = app.login().await;

        let response = app.client.get("/api/v1/redemptions?status=excused").private_cookie(student.cookie()).dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);

        let response = app.client.get("/api/v1/redemptions?from=03/02/2026").private_cookie(student.cookie()).dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
    }
}
