use mongodb::bson::doc;
use rocket::{serde::json::Json, Route};

use crate::error::{Error, Result};
use crate::model::{
    api::{CandidateDescription, CandidateSpec},
    auth::AuthToken,
    db::{Admin, Candidate, NewCandidate, User},
    mongodb::{Coll, Id},
};

pub fn routes() -> Vec<Route> {
    routes![
        create_candidate,
        remove_candidate,
        reset_votes,
        reset_voting_status,
    ]
}

#[post("/candidates", data = "<spec>", format = "json")]
pub async fn create_candidate(
    _token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    new_candidates: Coll<NewCandidate>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateDescription>> {
    if spec.name.trim().is_empty() || spec.position.trim().is_empty() {
        return Err(Error::Validation(
            "Candidate name and position must both be provided".to_string(),
        ));
    }

    // Create and insert the candidate.
    let CandidateSpec {
        name,
        position,
        platform,
        image_ref,
    } = spec.0;
    let candidate = NewCandidate::new(name, position, platform, image_ref);
    let new_id: Id = new_candidates
        .insert_one(&candidate, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();

    // Retrieve the full candidate including ID.
    let candidate = candidates.find_one(new_id.as_doc(), None).await?.unwrap();
    Ok(Json(candidate.into()))
}

/// Remove a candidate outright. Irreversible: votes already recorded for them
/// are not recoverable, so callers must confirm before invoking.
#[delete("/candidates/<id>")]
pub async fn remove_candidate(
    _token: AuthToken<Admin>,
    id: Id,
    candidates: Coll<Candidate>,
) -> Result<()> {
    let result = candidates.delete_one(id.as_doc(), None).await?;
    if result.deleted_count == 0 {
        return Err(Error::NotFound(format!("No candidate with ID {id}")));
    }
    Ok(())
}

/// Zero every candidate's tally. Irreversible.
#[post("/election/reset-votes")]
pub async fn reset_votes(_token: AuthToken<Admin>, candidates: Coll<Candidate>) -> Result<()> {
    let update = doc! {
        "$set": { "votes": 0 },
    };
    candidates.update_many(doc! {}, update, None).await?;
    Ok(())
}

/// Clear every user's voted flag, re-enabling voting for an election re-run.
/// Irreversible (and deliberately re-enables repeat voting).
#[post("/election/reset-voters")]
pub async fn reset_voting_status(_token: AuthToken<Admin>, users: Coll<User>) -> Result<()> {
    let update = doc! {
        "$set": { "has_voted": false },
    };
    users.update_many(doc! {}, update, None).await?;
    Ok(())
}
