use rocket::Route;

pub mod admin;
pub mod auth;
pub mod results;
pub mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(auth::routes());
    routes.extend(voting::routes());
    routes.extend(results::routes());
    routes.extend(admin::routes());
    routes
}
