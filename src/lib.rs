pub mod aggregate;
pub mod cache;
pub mod config;
pub mod database;
pub mod dates;
pub mod hierarchy;
pub mod issue_key;
pub mod jira_client;
pub mod models;
pub mod report;
pub mod repository;
pub mod resolver;
pub mod source;
pub mod sync;
pub mod toggl_client;

pub mod routes {
    pub mod report;
    pub mod root;
}

#[cfg(test)]
pub(crate) mod test_support;

use config::Settings;
use database::Database;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::get(routes::root::root))
        .route("/report/{since}/{until}", axum::routing::get(routes::report::report))
        .with_state(state)
}
