//! pinecast: converts Pine-style indicator and strategy scripts into Rust
//! modules that run against [`runtime`].
//!
//! Hexagonal architecture: the transpiler pipeline lives in [`domain`], port
//! traits in [`ports`], concrete implementations in [`adapters`], and the
//! command line front end in [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod runtime;
pub mod cli;
