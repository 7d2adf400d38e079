use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A complete ballot: exactly one chosen candidate for every position
/// currently contested. Applied all-or-nothing.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotSpec {
    /// Maps each position to the chosen candidate's ID.
    pub selections: HashMap<String, Id>,
}
