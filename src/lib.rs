#[macro_use]
extern crate rocket;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

/// Assemble the rocket. The database connection, application config, and
/// request logging are all attached as fairings and run at ignition.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(config::ConfigFairing)
        .attach(config::DatabaseFairing)
        .attach(logging::LoggerFairing)
}

/// Connect to the database server used for tests.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::Client {
    let db_uri = std::env::var("ROCKET_DB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .expect("Could not connect to the test database server")
}

/// Random database name, so concurrently-running tests cannot collide.
#[cfg(test)]
pub(crate) fn database() -> String {
    let random: u32 = rand::random();
    format!("test{random}")
}

/// Build a rocket running against the given database, skipping the database
/// fairing so tests control exactly which database is used (and can inspect
/// and drop it afterwards).
#[cfg(test)]
pub(crate) async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    use model::{db::ensure_admin_exists, mongodb::ensure_indexes_exist};

    let db = client.database(db_name);
    ensure_indexes_exist(&db)
        .await
        .expect("Failed to create indexes on the test database");
    ensure_admin_exists(&model::mongodb::Coll::from_db(&db))
        .await
        .expect("Failed to provision the bootstrap admin");

    rocket::build()
        .mount("/", api::routes())
        .attach(config::ConfigFairing)
        .attach(logging::LoggerFairing)
        .manage(client)
        .manage(db)
}
