//! API-facing (e.g. de/serialisable) request and response types.

pub mod auth;
pub use auth::{LoginRequest, PasswordChangeRequest, RegisterRequest, SessionInfo};

pub mod ballot;
pub use ballot::BallotSpec;

pub mod candidate;
pub use candidate::{CandidateDescription, CandidateSpec, PositionCandidates};

pub mod results;
pub use results::{CandidateTally, PositionResult};
