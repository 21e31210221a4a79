use chrono::{DateTime, Duration, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

/// What a check-in session stands for: a class meeting or a cafeteria meal window.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Default, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Class,
    Meal { meal_type: MealType },
}

impl SessionKind {
    pub fn to_db(self) -> &'static str {
        match self {
            SessionKind::Class => "class",
            SessionKind::Meal { meal_type: MealType::Breakfast } => "breakfast",
            SessionKind::Meal { meal_type: MealType::Lunch } => "lunch",
            SessionKind::Meal { meal_type: MealType::Dinner } => "dinner",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "class" => Some(SessionKind::Class),
            "breakfast" => Some(SessionKind::Meal { meal_type: MealType::Breakfast }),
            "lunch" => Some(SessionKind::Meal { meal_type: MealType::Lunch }),
            "dinner" => Some(SessionKind::Meal { meal_type: MealType::Dinner }),
            _ => None,
        }
    }
}

/// A bounded event credentials are issued against. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: SessionKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    /// Minutes after `starts_at` that still count as on time.
    pub grace_minutes: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn grace(&self) -> Duration {
        Duration::minutes(i64::from(self.grace_minutes))
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }
}

/// Validated input for opening a session, owner already resolved.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub owner_id: Uuid,
    pub kind: SessionKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    /// Falls back to the configured default when absent.
    pub grace_minutes: Option<i32>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct SessionRequest {
    #[serde(default)]
    pub kind: SessionKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[validate(length(min = 1, max = 200))]
    pub location: Option<String>,
    #[validate(range(min = 0, max = 240))]
    pub grace_minutes: Option<i32>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: SessionKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub location: Option<String>,
    pub grace_minutes: i32,
    pub active: bool,
}

impl NewSession {
    pub fn from_request(owner_id: Uuid, request: SessionRequest) -> Self {
        NewSession {
            owner_id,
            kind: request.kind,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            location: request.location,
            grace_minutes: request.grace_minutes,
        }
    }
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        SessionResponse {
            id: session.id,
            owner_id: session.owner_id,
            kind: session.kind,
            starts_at: session.starts_at,
            ends_at: session.ends_at,
            location: session.location.clone(),
            grace_minutes: session.grace_minutes,
            active: session.active,
        }
    }
}
