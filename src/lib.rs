pub mod adapters;
pub mod api;
pub mod broker;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod runtime;

pub use broker::BrokerManager;
pub use config::{AgentConfig, AppConfig};
pub use error::{BrokerError, Result};
