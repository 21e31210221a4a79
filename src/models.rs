pub mod audit;
pub mod credential;
pub mod health;
pub mod redemption;
pub mod session;
