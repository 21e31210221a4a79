pub mod credential;
pub mod error;
pub mod health;
pub mod redemption;
pub mod session;

use crate::error::app_error::AppError;
use chrono::NaiveDate;
use uuid::Uuid;

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::InvalidArgument(format!("Invalid {} id", what)))
}

pub(crate) fn parse_day(raw: Option<&str>, what: &str) -> Result<Option<NaiveDate>, AppError> {
    raw.map(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| AppError::InvalidArgument(format!("{} must be a YYYY-MM-DD date", what))))
        .transpose()
}
