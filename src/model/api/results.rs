use serde::{Deserialize, Serialize};

use crate::model::{db::Candidate, mongodb::Id};

/// One candidate's tally within a position.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub id: Id,
    pub name: String,
    pub votes: u32,
}

impl From<Candidate> for CandidateTally {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.candidate.name,
            votes: candidate.candidate.votes,
        }
    }
}

/// Tallies for every candidate contesting a position, ordered by descending
/// vote count with ties broken by candidate ID for determinism.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionResult {
    pub position: String,
    pub tallies: Vec<CandidateTally>,
}
