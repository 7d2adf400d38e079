//! Load test for a running ballotbox server.
//!
//! Registers a fleet of voters, has them all sign in and cast complete
//! ballots concurrently, then checks via the results endpoint that every
//! submission was counted exactly once. Needs the admin credentials printed
//! by the server on first run (or set afterwards).

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::seq::SliceRandom;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

const VOTER_PASSWORD: &str = "benchmark-voter";
const MAX_BALLOT_RETRIES: u32 = 3;

#[derive(Parser)]
struct Args {
    /// Base URL of the server under test.
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    url: String,

    /// How many voters to simulate.
    #[arg(long, default_value_t = 50)]
    voters: usize,

    /// How many positions to contest.
    #[arg(long, default_value_t = 3)]
    positions: usize,

    /// How many candidates per position.
    #[arg(long, default_value_t = 4)]
    candidates: usize,

    /// How many threads to use. Defaults to the number of logical CPUs.
    #[arg(long, default_value_t = num_cpus::get())]
    threads: usize,

    /// Student ID of an administrator account.
    #[arg(long, default_value = "admin")]
    admin_id: String,

    /// Password of the administrator account.
    #[arg(long)]
    admin_password: String,
}

#[derive(Debug, Deserialize)]
struct Oid {
    #[serde(rename = "$oid")]
    oid: String,
}

#[derive(Debug, Deserialize)]
struct CandidateDescription {
    id: Oid,
    #[allow(dead_code)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct PositionCandidates {
    #[allow(dead_code)]
    position: String,
    candidates: Vec<CandidateDescription>,
}

#[derive(Debug, Deserialize)]
struct CandidateTally {
    #[allow(dead_code)]
    name: String,
    votes: u64,
}

#[derive(Debug, Deserialize)]
struct PositionResult {
    position: String,
    tallies: Vec<CandidateTally>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let url = args.url.trim_end_matches('/').to_string();

    // Sign in as the administrator.
    let admin = Client::builder().cookie_store(true).build()?;
    let response = admin
        .post(format!("{url}/auth/login"))
        .json(&json!({"student_id": args.admin_id, "password": args.admin_password}))
        .send()
        .context("Could not reach the server")?;
    if !response.status().is_success() {
        bail!("Admin login failed: {}", response.status());
    }

    // Start from a clean slate: remove leftover candidates and clear voted
    // flags from any previous run.
    let listing: Vec<PositionCandidates> =
        admin.get(format!("{url}/candidates")).send()?.json()?;
    for group in listing {
        for candidate in group.candidates {
            admin
                .delete(format!("{url}/candidates/{}", candidate.id.oid))
                .send()?
                .error_for_status()?;
        }
    }
    admin
        .post(format!("{url}/election/reset-voters"))
        .send()?
        .error_for_status()?;

    // Create the field of candidates.
    let mut ballot_space: Vec<(String, Vec<String>)> = Vec::new();
    for p in 0..args.positions {
        let position = format!("Position {p:02}");
        let mut ids = Vec::new();
        for c in 0..args.candidates {
            let created: CandidateDescription = admin
                .post(format!("{url}/candidates"))
                .json(&json!({
                    "name": format!("Candidate {p:02}-{c:02}"),
                    "position": position,
                    "platform": "Benchmark candidate",
                }))
                .send()?
                .error_for_status()?
                .json()?;
            ids.push(created.id.oid);
        }
        ballot_space.push((position, ids));
    }

    // Register the voters. Student IDs carry a nonce so re-runs against the
    // same database don't collide with earlier registrations.
    let nonce = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    let student_ids: Vec<String> = (0..args.voters)
        .map(|i| format!("bench-{nonce}-{i:04}"))
        .collect();
    for student_id in &student_ids {
        admin
            .post(format!("{url}/auth/register"))
            .json(&json!({
                "student_id": student_id,
                "name": format!("Bench Voter {student_id}"),
                "password": VOTER_PASSWORD,
            }))
            .send()?
            .error_for_status()?;
    }
    println!(
        "Prepared {} voters, {} positions x {} candidates; voting on {} threads...",
        args.voters, args.positions, args.candidates, args.threads
    );

    // Vote, hard.
    let queue = Mutex::new(student_ids.iter());
    let latencies: Mutex<Vec<Duration>> = Mutex::new(Vec::with_capacity(args.voters));
    let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let started = Instant::now();
    thread::scope(|scope| {
        for _ in 0..args.threads {
            scope.spawn(|| loop {
                let next = queue.lock().unwrap().next();
                let Some(student_id) = next else { break };
                match vote(&url, student_id, &ballot_space) {
                    Ok(latency) => latencies.lock().unwrap().push(latency),
                    Err(err) => failures.lock().unwrap().push(format!("{student_id}: {err}")),
                }
            });
        }
    });
    let elapsed = started.elapsed();

    let failures = failures.into_inner().unwrap();
    if !failures.is_empty() {
        for failure in &failures {
            eprintln!("FAILED {failure}");
        }
        bail!("{} of {} submissions failed", failures.len(), args.voters);
    }

    // Every accepted ballot must be counted exactly once per position.
    let results: Vec<PositionResult> = admin.get(format!("{url}/results")).send()?.json()?;
    for group in &results {
        let total: u64 = group.tallies.iter().map(|t| t.votes).sum();
        if total != args.voters as u64 {
            bail!(
                "Tally mismatch for {}: expected {}, got {total}",
                group.position,
                args.voters
            );
        }
    }

    let latencies = latencies.into_inner().unwrap();
    let mean = latencies.iter().sum::<Duration>() / latencies.len() as u32;
    let max = latencies.iter().max().unwrap();
    println!(
        "{} ballots in {elapsed:.2?} ({:.1}/s); submission latency mean {mean:.2?}, max {max:.2?}",
        args.voters,
        args.voters as f64 / elapsed.as_secs_f64(),
    );
    println!("All tallies check out.");
    Ok(())
}

/// Sign in as the given voter and cast a random complete ballot, retrying on
/// store-level conflicts (which the server reports as 500 and are safe to
/// retry with the same ballot).
fn vote(url: &str, student_id: &str, ballot_space: &[(String, Vec<String>)]) -> Result<Duration> {
    let client = Client::builder().cookie_store(true).build()?;
    let response = client
        .post(format!("{url}/auth/login"))
        .json(&json!({"student_id": student_id, "password": VOTER_PASSWORD}))
        .send()?;
    if !response.status().is_success() {
        bail!("login failed with {}", response.status());
    }

    let selections: HashMap<&str, serde_json::Value> = {
        let mut rng = rand::thread_rng();
        ballot_space
            .iter()
            .map(|(position, ids)| {
                let id = ids.choose(&mut rng).unwrap();
                (position.as_str(), json!({ "$oid": id }))
            })
            .collect()
    };

    let started = Instant::now();
    for attempt in 1.. {
        let response = client
            .post(format!("{url}/ballot"))
            .json(&json!({ "selections": selections }))
            .send()?;
        if response.status().is_success() {
            return Ok(started.elapsed());
        }
        if !response.status().is_server_error() || attempt >= MAX_BALLOT_RETRIES {
            bail!("ballot rejected with {}", response.status());
        }
    }
    unreachable!()
}
