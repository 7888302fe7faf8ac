//! The `JobStore` contract and its reference implementations.

mod in_memory;
mod job_store;
mod postgres;
mod types;

pub use in_memory::InMemoryJobStore;
pub use job_store::{JobStore, StoreError};
pub use postgres::PostgresJobStore;
pub use types::{Job, JobFilter, JobStatus, OrderBy, OrderDirection};
