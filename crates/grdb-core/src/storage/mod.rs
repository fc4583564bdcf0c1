//! # Persistent Storage
//!
//! Disk-backed implementations of the recipe store.

mod redb_store;

pub use redb_store::RedbStore;
