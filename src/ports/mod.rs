//! Port traits the converter depends on.

pub mod config_port;
pub mod script_port;
