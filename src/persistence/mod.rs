//! Persistence layer
//!
//! `BrokerStore` is the single point of concurrency control for broker state.
//! Implementations live in `adapters` (Postgres and in-memory).

pub mod store;

pub use store::BrokerStore;
