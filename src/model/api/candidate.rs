use serde::{Deserialize, Serialize};

use crate::model::{db::Candidate, mongodb::Id};

/// A new candidate to add to the ballot.
#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub name: String,
    pub position: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// A candidate as shown to voters. Deliberately excludes the running tally:
/// voters see the field, not the scoreboard.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: Id,
    pub name: String,
    pub platform: String,
    pub image_ref: Option<String>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.candidate.name,
            platform: candidate.candidate.platform,
            image_ref: candidate.candidate.image_ref,
        }
    }
}

/// All candidates contesting a single position.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCandidates {
    pub position: String,
    pub candidates: Vec<CandidateDescription>,
}
