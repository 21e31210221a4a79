pub mod checkin;
pub mod issuer;
pub mod redemption;
pub mod validator;
