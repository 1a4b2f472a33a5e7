//! Provisioning core
//!
//! Pure pieces (`ports`, `templater`, `strategy`, `dispatcher::pick_agent`)
//! are composed by the per-agent `Provisioner` and routed by `BrokerManager`.

pub mod dispatcher;
pub mod manager;
pub mod orchestrator;
pub mod ports;
pub mod strategy;
pub mod templater;

pub use dispatcher::Dispatcher;
pub use manager::BrokerManager;
pub use orchestrator::{Provisioner, ProvisionerSettings};
pub use strategy::{ExecutorKind, Strategy, Verb};
