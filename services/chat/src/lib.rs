//! Cognigy Chat Library Crate
//!
//! Configuration and input handling for the `cognigy-chat` terminal client.
//! The binary is a thin wrapper that wires these to a `cognigy_client::Session`.

pub mod command;
pub mod config;
pub mod repl;
