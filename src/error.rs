use thiserror::Error;

use crate::models::{ApplicationStatus, Role};

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("You must be signed in to do that")]
    NotAuthenticated,

    #[error("This action requires the {required} role")]
    Forbidden { required: Role },

    #[error("Job #{0} was posted by another client")]
    NotOwner(i64),

    #[error("No profile found for user {0}")]
    UserNotFound(String),

    #[error("Job #{0} not found")]
    JobNotFound(i64),

    #[error("Application #{0} not found")]
    ApplicationNotFound(i64),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("Application #{0} has not been approved")]
    NotApproved(i64),

    #[error("Application #{0} has already been reviewed")]
    DuplicateReview(i64),

    #[error("Application #{id} is already {from}")]
    InvalidTransition { id: i64, from: ApplicationStatus },

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("Email {0} is already registered")]
    EmailInUse(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Presence check used by every form-backed operation.
pub fn require_field(value: &str, name: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WorkflowError::MissingField(name));
    }
    Ok(())
}
