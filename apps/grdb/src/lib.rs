//! # grdb
//!
//! The application layer of the growth recipe database: HTTP API, CLI,
//! layered configuration and remote spectrum retrieval on top of
//! `grdb-core`.

pub mod api;
pub mod cli;
pub mod config;
pub mod remote;
