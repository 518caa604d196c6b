//! Concrete adapter implementations for ports.

pub mod file_config_adapter;
pub mod fs_script_adapter;
