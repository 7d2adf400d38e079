//! DB-compatible (e.g. de/serialisable) types.

mod candidate;
pub use candidate::{Candidate, CandidateCore, NewCandidate};

mod user;
pub use user::{
    ensure_admin_exists, Admin, NewUser, User, UserCore, Voter, DEFAULT_ADMIN_STUDENT_ID,
};
