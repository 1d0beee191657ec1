//! Client core for a Discord-compatible gateway: the control connection
//! state machine and the paced voice send path.

pub mod common;
pub mod configs;
pub mod gateway;
pub mod voice;
