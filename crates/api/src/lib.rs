//! Larder API library.
//!
//! The server binary is a thin wrapper around [`routes::app`]; the CLI and
//! the integration tests use the same services and repositories.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
