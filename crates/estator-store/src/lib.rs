//! Durable job store for the Estator pipeline.
//!
//! The [`JobRepository`] trait is the only path to job-row mutation in the
//! whole system; its compare-and-swap [`JobRepository::transition`] is the
//! sole concurrency-control primitive. Two implementations are provided:
//! [`MemoryRepository`] for tests and ephemeral runs, and
//! [`SqliteRepository`] for durable single-node deployments.

/// In-memory repository backed by a `HashMap`.
pub mod memory;
/// The repository contract.
pub mod repository;
/// SQLite-backed repository.
pub mod sqlite;

pub use memory::MemoryRepository;
pub use repository::JobRepository;
pub use sqlite::SqliteRepository;
