pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod forwarder;
pub mod models;
pub mod notice;
pub mod routes;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;
