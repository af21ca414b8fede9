//! Integration test common infrastructure.
//!
//! Spawns real confabd processes and drives them over TCP with a
//! line-oriented test client.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::TestServer;

/// Server name every test instance runs under; the prompt is derived
/// from it.
pub const SERVER_NAME: &str = "testnet";

/// The ready prompt as it arrives on the wire.
pub fn prompt() -> String {
    format!("[{SERVER_NAME}] Command:")
}
