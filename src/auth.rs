use crate::error::app_error::AppError;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Name of the private cookie holding `<login_session_id>:<user_id>`.
pub const SESSION_COOKIE: &str = "user";

/// Maps an authenticated login onto the principal id used as issuer, owner or subject.
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_caller(&self, login_session_id: &Uuid, user_id: &Uuid) -> Result<Option<Uuid>, AppError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
}

pub(crate) fn parse_session_cookie_value(value: &str) -> Option<(Uuid, Uuid)> {
    let (session_id_str, user_id_str) = value.split_once(':')?;
    let session_id = Uuid::parse_str(session_id_str).ok()?;
    let user_id = Uuid::parse_str(user_id_str).ok()?;
    Some((session_id, user_id))
}

pub fn session_cookie_value(login_session_id: &Uuid, user_id: &Uuid) -> String {
    format!("{}:{}", login_session_id, user_id)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let cookies = req.cookies();
        if let Some(cookie) = cookies.get_private(SESSION_COOKIE)
            && let Some((session_id, user_id)) = parse_session_cookie_value(cookie.value())
        {
            let resolver = match req.rocket().state::<Arc<dyn IdentityResolver>>() {
                Some(resolver) => resolver,
                None => return Outcome::Error((Status::InternalServerError, AppError::Unauthorized)),
            };

            match resolver.resolve_caller(&session_id, &user_id).await {
                Ok(Some(id)) => {
                    let current_user = CurrentUser { id };
                    req.local_cache(|| Some(current_user.clone()));
                    return Outcome::Success(current_user);
                }
                Ok(None) => return Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
                Err(err) => return Outcome::Error((Status::from(&err), err)),
            }
        }

        Outcome::Error((Status::Unauthorized, AppError::Unauthorized))
    }
}

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Cookie-based authentication. The private `user` cookie carries the login session.".to_string()),
            data: SecuritySchemeData::ApiKey {
                name: SESSION_COOKIE.to_string(),
                location: "cookie".to_string(),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("cookieAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("cookieAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - Authentication required".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}
