//! Gateway - TCP listener that accepts incoming connections.
//!
//! The Gateway binds to the configured socket and spawns a session task
//! for each incoming client. Blocked addresses are screened here, before
//! the peer sees a single byte.

use crate::config::Config;
use crate::handlers::Registry;
use crate::session;
use crate::state::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

/// The Gateway accepts incoming TCP connections and spawns session tasks.
pub struct Gateway {
    listener: TcpListener,
    engine: Arc<Engine>,
    registry: Arc<Registry>,
}

impl Gateway {
    /// Bind the gateway to the address in the configuration.
    pub async fn bind(
        config: &Config,
        engine: Arc<Engine>,
        registry: Arc<Registry>,
    ) -> anyhow::Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "Listener bound");
        Ok(Self {
            listener,
            engine,
            registry,
        })
    }

    /// The address the listener actually bound to. Differs from the
    /// configured one when the port was 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the gateway, accepting connections until shutdown.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        let mut shutdown_rx = self.engine.subscribe_shutdown();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        // Screened before any write: a blocked peer gets a
                        // silent close, never a banner.
                        if self.engine.is_blocked(addr.ip()) {
                            info!(%addr, "Connection rejected, address is blocked");
                            drop(stream);
                            continue;
                        }

                        info!(%addr, "Connection accepted");
                        let engine = Arc::clone(&self.engine);
                        let registry = Arc::clone(&self.registry);
                        tokio::spawn(session::run_session(engine, registry, stream, addr));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Listener stopping");
                    // Session tasks are still flushing their shutdown
                    // notices; give them a beat before the runtime drops.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    return Ok(());
                }
            }
        }
    }
}
