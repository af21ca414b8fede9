//! Network module.
//!
//! Contains the Gateway, the TCP listener that screens and accepts
//! incoming connections and spawns a session task per client.

mod gateway;

pub use gateway::Gateway;
