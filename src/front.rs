pub mod cli;
pub mod config;
pub mod github_events;
pub mod handlers;
pub mod routes;
