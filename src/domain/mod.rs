pub mod agent;
pub mod catalog;
pub mod certs;
pub mod instance;

pub use agent::*;
pub use catalog::*;
pub use certs::*;
pub use instance::*;
