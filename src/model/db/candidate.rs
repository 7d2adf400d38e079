use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    /// The position this candidate contests. The set of positions on a ballot
    /// is exactly the distinct set of these values.
    pub position: String,
    /// Free-text platform / duties, shown to voters.
    pub platform: String,
    /// Opaque image reference for the presentation layer to resolve.
    pub image_ref: Option<String>,
    /// Current tally. Only ever incremented by one inside a ballot
    /// transaction, or zeroed by an administrative reset.
    pub votes: u32,
}

impl CandidateCore {
    /// Create a new candidate with no votes.
    pub fn new(
        name: impl Into<String>,
        position: impl Into<String>,
        platform: impl Into<String>,
        image_ref: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            position: position.into(),
            platform: platform.into(),
            image_ref,
            votes: 0,
        }
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl CandidateCore {
        pub fn example(name: &str, position: &str) -> Self {
            Self::new(name, position, format!("{name} for {position}"), None)
        }
    }
}
