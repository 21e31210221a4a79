use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Correlates the log lines of one request, echoed back as `X-Request-Id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Tags each request with a [`RequestId`] and logs its outcome.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let request_id = RequestId::new();
        let method = request.method();
        let uri = request.uri();

        request.local_cache(|| Some(request_id.clone()));

        info!(
            request_id = %request_id.0,
            method = %method,
            uri = %uri,
            "incoming request"
        );
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let request_id = request
            .local_cache(|| None::<RequestId>)
            .as_ref()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let status = response.status();
        let method = request.method();
        let uri = request.uri();

        response.set_header(Header::new("X-Request-Id", request_id.clone()));

        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));
        response.set_header(Header::new("X-Frame-Options", "DENY"));
        response.set_header(Header::new("Cache-Control", "no-store"));

        if status.class().is_server_error() {
            error!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                "request failed"
            );
        } else if status.class().is_client_error() {
            warn!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                "request rejected"
            );
        } else {
            info!(
                request_id = %request_id,
                method = %method,
                uri = %uri,
                status = %status.code,
                "request completed"
            );
        }
    }
}

/// Header carrying the caller's deadline in milliseconds.
pub const DEADLINE_HEADER: &str = "X-Request-Timeout-Ms";

/// Optional caller-supplied deadline. Absent or unparsable values fall back to the server default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestDeadline(pub Option<Duration>);

impl RequestDeadline {
    fn parse(raw: Option<&str>) -> Self {
        let millis = raw.and_then(|value| value.trim().parse::<u64>().ok()).filter(|ms| *ms > 0);
        RequestDeadline(millis.map(Duration::from_millis))
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestDeadline {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, ()> {
        Outcome::Success(RequestDeadline::parse(req.headers().get_one(DEADLINE_HEADER)))
    }
}

impl<'a> OpenApiFromRequest<'a> for RequestDeadline {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
