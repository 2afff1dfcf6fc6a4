// Classroom client - library root

pub mod api;
pub mod assessment;
pub mod auth;
pub mod classify;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod notify;
pub mod prompt;
pub mod validation;

#[cfg(test)]
mod test_support;
