pub mod credential;
pub mod login;
pub mod memory;
pub mod postgres_repository;
pub mod redemption;
pub mod session;

use crate::database::credential::CredentialRepository;
use crate::database::redemption::RedemptionRepository;
use crate::database::session::SessionRepository;

/// Everything the check-in services need from durable storage.
pub trait CheckinStore: SessionRepository + CredentialRepository + RedemptionRepository {}

impl<T> CheckinStore for T where T: SessionRepository + CredentialRepository + RedemptionRepository {}
