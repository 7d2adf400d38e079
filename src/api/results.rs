use mongodb::{bson::doc, options::FindOptions};
use rocket::{futures::TryStreamExt, serde::json::Json, Route};

use crate::error::Result;
use crate::model::{
    api::PositionResult,
    auth::AuthToken,
    db::{Admin, Candidate},
    mongodb::Coll,
};

pub fn routes() -> Vec<Route> {
    routes![results]
}

/// Current tallies for every candidate, grouped by position and ordered by
/// descending vote count (ties broken by candidate ID, so the order is
/// deterministic). Read-only; reflects whatever has committed by the time the
/// store serves the read, which is all a tally between ballots can promise.
#[get("/results")]
pub async fn results(
    _token: AuthToken<Admin>,
    candidates: Coll<Candidate>,
) -> Result<Json<Vec<PositionResult>>> {
    let options = FindOptions::builder()
        .sort(doc! {"position": 1, "votes": -1, "_id": 1})
        .build();
    let all: Vec<Candidate> = candidates.find(None, options).await?.try_collect().await?;

    // The sort above means equal positions are adjacent and each group is
    // already in final order.
    let mut grouped: Vec<PositionResult> = Vec::new();
    for candidate in all {
        match grouped.last_mut() {
            Some(group) if group.position == candidate.position => {
                group.tallies.push(candidate.into());
            }
            _ => grouped.push(PositionResult {
                position: candidate.position.clone(),
                tallies: vec![candidate.into()],
            }),
        }
    }

    Ok(Json(grouped))
}
