pub mod base;
pub mod gateway;
pub mod logging;

pub use base::*;
pub use gateway::*;
pub use logging::*;
