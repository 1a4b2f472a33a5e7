pub mod broker;
pub mod certs;
pub mod images;

pub use broker::*;
pub use certs::*;
pub use images::*;
