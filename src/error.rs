use argon2::Error as Argon2Error;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind as JwtErrorKind};
use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a request can end in. The first block is the ballot engine's
/// taxonomy; each validation failure is terminal for the request, while `Db`
/// covers transient store failures and is safe for the caller to retry with
/// the same ballot.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown voter: {0}")]
    UnknownVoter(String),
    #[error("This voter has already cast their ballot")]
    AlreadyVoted,
    #[error("Incomplete ballot: {0}")]
    IncompleteBallot(String),
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("Student ID already registered: {0}")]
    DuplicateStudentId(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        warn!("Request failed: {self}");
        Err(match self {
            Self::UnknownVoter(_) | Self::NotFound(_) => Status::NotFound,
            Self::AlreadyVoted => Status::Forbidden,
            Self::IncompleteBallot(_) | Self::InvalidSelection(_) => Status::UnprocessableEntity,
            Self::DuplicateStudentId(_) => Status::Conflict,
            Self::Validation(_) => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Db(_) => Status::InternalServerError,
            Self::Jwt(err) => match err.into_kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    Status::Unauthorized
                }
                _ => Status::BadRequest,
            },
            Self::Argon2(_) => Status::BadRequest,
        })
    }
}
