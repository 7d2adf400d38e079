use std::collections::HashSet;

use mongodb::{bson::doc, options::FindOptions, Client};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};

use crate::error::{Error, Result};
use crate::model::{
    api::{BallotSpec, PositionCandidates},
    auth::AuthToken,
    db::{Candidate, User, Voter},
    mongodb::Coll,
};

pub fn routes() -> Vec<Route> {
    routes![list_candidates, cast_ballot]
}

/// List all candidates grouped by position, for rendering a ballot form.
/// Public: this is campaign information, and it never includes tallies.
#[get("/candidates")]
pub async fn list_candidates(candidates: Coll<Candidate>) -> Result<Json<Vec<PositionCandidates>>> {
    let options = FindOptions::builder()
        .sort(doc! {"position": 1, "name": 1, "_id": 1})
        .build();
    let all: Vec<Candidate> = candidates.find(None, options).await?.try_collect().await?;

    // The sort above means equal positions are adjacent.
    let mut grouped: Vec<PositionCandidates> = Vec::new();
    for candidate in all {
        match grouped.last_mut() {
            Some(group) if group.position == candidate.position => {
                group.candidates.push(candidate.into());
            }
            _ => grouped.push(PositionCandidates {
                position: candidate.position.clone(),
                candidates: vec![candidate.into()],
            }),
        }
    }

    Ok(Json(grouped))
}

/// Cast the signed-in voter's ballot: exactly one selection for every
/// contested position, applied all-or-nothing.
///
/// Every check and every write happens inside a single transaction, so no
/// failure can record votes without marking the voter, or vice versa. The
/// `has_voted` flip at the end filters on the flag still being clear, which
/// re-verifies it in the same atomic unit; two racing submissions from one
/// voter can therefore never both commit. A transaction-level failure
/// surfaces as a 500 and is safe to retry with the same ballot.
#[post("/ballot", data = "<ballot>", format = "json")]
pub async fn cast_ballot(
    token: AuthToken<Voter>,
    ballot: Json<BallotSpec>,
    users: Coll<User>,
    candidates: Coll<Candidate>,
    db_client: &State<Client>,
) -> Result<()> {
    let selections = ballot.0.selections;

    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;
    // Any early return below drops the session, which aborts the transaction.

    // The voter must exist...
    let voter = users
        .find_one_with_session(token.id.as_doc(), None, &mut session)
        .await?
        .ok_or_else(|| Error::UnknownVoter(format!("No voter with ID {}", token.id)))?;
    // ...and must not have voted already.
    if voter.has_voted {
        return Err(Error::AlreadyVoted);
    }

    // The ballot must cover exactly the positions currently contested:
    // none missing, none invented.
    let mut positions: HashSet<String> = HashSet::new();
    {
        let mut cursor = candidates
            .find_with_session(None, None, &mut session)
            .await?;
        while let Some(candidate) = cursor.next(&mut session).await {
            positions.insert(candidate?.candidate.position);
        }
    }
    for position in &positions {
        if !selections.contains_key(position) {
            return Err(Error::IncompleteBallot(format!(
                "No selection for {position}"
            )));
        }
    }
    for position in selections.keys() {
        if !positions.contains(position) {
            return Err(Error::IncompleteBallot(format!(
                "No such position: {position}"
            )));
        }
    }

    // One vote per selection. Filtering on the claimed position as well as
    // the ID rejects a candidate smuggled in under the wrong position.
    for (position, candidate_id) in &selections {
        let filter = doc! {
            "_id": *candidate_id,
            "position": position.as_str(),
        };
        let update = doc! {
            "$inc": { "votes": 1 },
        };
        let result = candidates
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        if result.matched_count != 1 {
            return Err(Error::InvalidSelection(format!(
                "Candidate {candidate_id} does not contest {position}"
            )));
        }
    }

    // Mark the voter, re-verifying `has_voted` inside the transaction. If a
    // concurrent submission got there first, nothing above survives the abort.
    let result = users
        .update_one_with_session(
            doc! { "_id": token.id, "has_voted": false },
            doc! { "$set": { "has_voted": true } },
            None,
            &mut session,
        )
        .await?;
    if result.modified_count != 1 {
        return Err(Error::AlreadyVoted);
    }

    session.commit_transaction().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use mongodb::Database;
    use rocket::{
        futures::future::{join, join_all},
        http::{ContentType, Cookie, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json,
    };

    use crate::model::{
        db::{NewCandidate, NewUser, UserCore},
        mongodb::Id,
    };
    use crate::Config;

    use super::*;

    #[backend_test]
    async fn candidates_are_listed_by_position(client: Client, db: Database) {
        insert_candidates(&db).await;

        let response = client.get(uri!(list_candidates)).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let raw_response = response.into_string().await.unwrap();
        let listing: Vec<PositionCandidates> = serde_json::from_str(&raw_response).unwrap();

        let positions: Vec<&str> = listing.iter().map(|g| g.position.as_str()).collect();
        assert_eq!(positions, vec!["President", "Vice President"]);
        let presidents: Vec<&str> = listing[0]
            .candidates
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(presidents, vec!["Alice Reyes", "Bong Santos"]);

        // Tallies must never leak through the public listing.
        assert!(!raw_response.contains("votes"));
    }

    #[backend_test(voter)]
    async fn ballot_applies_every_selection_atomically(client: Client, db: Database) {
        insert_candidates(&db).await;

        let ballot = ballot_for(&db, &[("President", "Alice Reyes"), ("Vice President", "Carla Cruz")]).await;
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::Ok, response.status());

        // One increment per position, nowhere else.
        assert_eq!(votes_for(&db, "Alice Reyes").await, 1);
        assert_eq!(votes_for(&db, "Carla Cruz").await, 1);
        assert_eq!(votes_for(&db, "Bong Santos").await, 0);
        assert_eq!(votes_for(&db, "Dante Diaz").await, 0);
        assert_eq!(total_votes(&db).await, ballot.selections.len() as u32);

        // The voter is marked in the same unit.
        assert!(voter_has_voted(&db).await);
    }

    #[backend_test(voter)]
    async fn resubmission_is_rejected(client: Client, db: Database) {
        insert_president_race(&db).await;

        let ballot = ballot_for(&db, &[("President", "Alice Reyes")]).await;
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::Ok, response.status());

        // A second ballot, for a different candidate, must change nothing.
        let ballot = ballot_for(&db, &[("President", "Bong Santos")]).await;
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::Forbidden, response.status());

        assert_eq!(votes_for(&db, "Alice Reyes").await, 1);
        assert_eq!(votes_for(&db, "Bong Santos").await, 0);
    }

    #[backend_test(voter)]
    async fn incomplete_ballots_are_rejected(client: Client, db: Database) {
        insert_candidates(&db).await;

        // Missing a position.
        let ballot = ballot_for(&db, &[("President", "Alice Reyes")]).await;
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        // Naming a position that does not exist.
        let mut ballot =
            ballot_for(&db, &[("President", "Alice Reyes"), ("Vice President", "Carla Cruz")])
                .await;
        let rogue_selection = *ballot.selections.get("President").unwrap();
        ballot
            .selections
            .insert("Treasurer".to_string(), rogue_selection);
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        // Neither attempt changed anything.
        assert_eq!(total_votes(&db).await, 0);
        assert!(!voter_has_voted(&db).await);
    }

    #[backend_test(voter)]
    async fn invalid_selections_leave_no_partial_votes(client: Client, db: Database) {
        insert_candidates(&db).await;

        // A real candidate claimed for the wrong position. The valid
        // President selection must not survive the abort.
        let mut ballot = ballot_for(
            &db,
            &[("President", "Alice Reyes"), ("Vice President", "Carla Cruz")],
        )
        .await;
        let wrong_position = candidate_by_name(&db, "Bong Santos").await.id;
        ballot
            .selections
            .insert("Vice President".to_string(), wrong_position);
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        // A candidate ID that matches nothing at all.
        ballot.selections.insert(
            "Vice President".to_string(),
            Id::from(mongodb::bson::oid::ObjectId::new()),
        );
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        assert_eq!(total_votes(&db).await, 0);
        assert!(!voter_has_voted(&db).await);
    }

    #[backend_test(admin)]
    async fn admins_cannot_vote(client: Client, db: Database) {
        insert_president_race(&db).await;

        let ballot = ballot_for(&db, &[("President", "Alice Reyes")]).await;
        // The voter guard forwards admin tokens, so no route matches.
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::NotFound, response.status());
        assert_eq!(total_votes(&db).await, 0);
    }

    #[backend_test]
    async fn unauthenticated_ballots_are_rejected(client: Client, db: Database) {
        insert_president_race(&db).await;

        let ballot = ballot_for(&db, &[("President", "Alice Reyes")]).await;
        let response = cast(&client, &ballot).await;
        assert_eq!(Status::NotFound, response.status());
        assert_eq!(total_votes(&db).await, 0);
    }

    #[backend_test]
    async fn concurrent_voters_tally_independently(client: Client, db: Database) {
        const VOTERS: usize = 50;

        // One candidate per voter, so no two transactions touch the same
        // documents and every submission should succeed first time.
        let candidates_coll = Coll::<NewCandidate>::from_db(&db);
        let new_candidates: Vec<NewCandidate> = (0..VOTERS)
            .map(|i| NewCandidate::example(&format!("Candidate {i:02}"), "President"))
            .collect();
        candidates_coll
            .insert_many(&new_candidates, None)
            .await
            .unwrap();

        let voters = insert_voters(&db, VOTERS).await;

        // Pair each voter with their own candidate.
        let mut submissions = Vec::with_capacity(VOTERS);
        for (i, voter) in voters.into_iter().enumerate() {
            let candidate = candidate_by_name(&db, &format!("Candidate {i:02}")).await;
            let cookie = voter_cookie(&client, voter);
            let ballot = BallotSpec {
                selections: HashMap::from_iter([("President".to_string(), candidate.id)]),
            };
            submissions.push((cookie, ballot));
        }

        let responses = join_all(
            submissions
                .iter()
                .map(|(cookie, ballot)| cast_as(&client, cookie, ballot)),
        )
        .await;
        for response in responses {
            assert_eq!(Status::Ok, response.status());
        }

        // No lost updates: every candidate has exactly one vote.
        let all: Vec<Candidate> = Coll::<Candidate>::from_db(&db)
            .find(None, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), VOTERS);
        assert!(all.iter().all(|c| c.votes == 1));
    }

    #[backend_test]
    async fn racing_resubmission_cannot_double_count(client: Client, db: Database) {
        insert_president_race(&db).await;
        let voter = insert_voters(&db, 1).await.remove(0);
        let cookie = voter_cookie(&client, voter);

        let ballot_a = ballot_for(&db, &[("President", "Alice Reyes")]).await;
        let ballot_b = ballot_for(&db, &[("President", "Bong Santos")]).await;

        let (response_a, response_b) = join(
            cast_as(&client, &cookie, &ballot_a),
            cast_as(&client, &cookie, &ballot_b),
        )
        .await;
        let mut statuses = vec![response_a.status(), response_b.status()];

        // A loser that hit a transaction conflict surfaces as a retryable
        // store error; retrying must now deterministically report the ballot
        // as already cast.
        if let Some(slot) = statuses
            .iter_mut()
            .find(|s| **s == Status::InternalServerError)
        {
            let retry = cast_as(&client, &cookie, &ballot_b).await;
            *slot = retry.status();
        }

        let accepted = statuses.iter().filter(|s| **s == Status::Ok).count();
        let rejected = statuses.iter().filter(|s| **s == Status::Forbidden).count();
        assert_eq!((accepted, rejected), (1, 1));

        // Exactly one acceptance is reflected in the tallies.
        assert_eq!(total_votes(&db).await, 1);
    }

    /// Two positions, two candidates each.
    async fn insert_candidates(db: &Database) {
        Coll::<NewCandidate>::from_db(db)
            .insert_many(
                [
                    NewCandidate::example("Alice Reyes", "President"),
                    NewCandidate::example("Bong Santos", "President"),
                    NewCandidate::example("Carla Cruz", "Vice President"),
                    NewCandidate::example("Dante Diaz", "Vice President"),
                ],
                None,
            )
            .await
            .unwrap();
    }

    /// A single position with two candidates.
    async fn insert_president_race(db: &Database) {
        Coll::<NewCandidate>::from_db(db)
            .insert_many(
                [
                    NewCandidate::example("Alice Reyes", "President"),
                    NewCandidate::example("Bong Santos", "President"),
                ],
                None,
            )
            .await
            .unwrap();
    }

    async fn insert_voters(db: &Database, count: usize) -> Vec<User> {
        let new_voters: Vec<NewUser> = (0..count)
            .map(|i| {
                UserCore::voter(format!("2023-{i:05}"), format!("Voter {i}"), "ballot-pw").unwrap()
            })
            .collect();
        Coll::<NewUser>::from_db(db)
            .insert_many(&new_voters, None)
            .await
            .unwrap();
        Coll::<User>::from_db(db)
            .find(doc! {"is_admin": false, "student_id": {"$regex": "^2023-"}}, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    async fn candidate_by_name(db: &Database, name: &str) -> Candidate {
        Coll::<Candidate>::from_db(db)
            .find_one(doc! {"name": name}, None)
            .await
            .unwrap()
            .unwrap()
    }

    async fn votes_for(db: &Database, name: &str) -> u32 {
        candidate_by_name(db, name).await.votes
    }

    async fn total_votes(db: &Database) -> u32 {
        Coll::<Candidate>::from_db(db)
            .find(None, None)
            .await
            .unwrap()
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .iter()
            .map(|c| c.votes)
            .sum()
    }

    /// Whether the example voter (logged in by the test macro) has voted.
    async fn voter_has_voted(db: &Database) -> bool {
        Coll::<User>::from_db(db)
            .find_one(doc! {"student_id": &NewUser::voter_example().student_id}, None)
            .await
            .unwrap()
            .unwrap()
            .has_voted
    }

    /// Build a ballot selecting the named candidate for each position.
    async fn ballot_for(db: &Database, selections: &[(&str, &str)]) -> BallotSpec {
        let mut map = HashMap::new();
        for (position, name) in selections {
            let candidate = candidate_by_name(db, name).await;
            map.insert(position.to_string(), candidate.id);
        }
        BallotSpec { selections: map }
    }

    /// Forge an auth cookie for the given voter, bypassing login.
    fn voter_cookie(client: &Client, user: User) -> Cookie<'static> {
        let config = client.rocket().state::<Config>().unwrap();
        AuthToken::new(&Voter(user)).into_cookie(config)
    }

    /// Submit a ballot using the client's own cookie jar.
    async fn cast<'c>(client: &'c Client, ballot: &BallotSpec) -> LocalResponse<'c> {
        client
            .post(uri!(cast_ballot))
            .header(ContentType::JSON)
            .body(serde_json::to_string(ballot).unwrap())
            .dispatch()
            .await
    }

    /// Submit a ballot with an explicit auth cookie.
    async fn cast_as<'c>(
        client: &'c Client,
        cookie: &Cookie<'static>,
        ballot: &BallotSpec,
    ) -> LocalResponse<'c> {
        client
            .post(uri!(cast_ballot))
            .header(ContentType::JSON)
            .cookie(cookie.clone())
            .body(serde_json::to_string(ballot).unwrap())
            .dispatch()
            .await
    }
}
