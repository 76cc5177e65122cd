//! Store implementations backing the contract traits defined in
//! `cryolive-contracts`: an in-memory store for tests and a
//! Postgres-backed store for production deployments.

pub mod memory;

#[cfg(feature = "database")]
pub mod postgres;

pub use memory::InMemoryStore;

#[cfg(feature = "database")]
pub use postgres::PostgresStore;
