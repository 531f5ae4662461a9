use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthenticationFailure;
use crate::password::PasswordHasherError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthenticationFailure),
    #[error("username already exists")]
    UserAlreadyExists,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid password")]
    InvalidPassword,
}
