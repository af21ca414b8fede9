//! Test server management.
//!
//! Spawns and manages confabd instances for integration testing.

use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// A test server instance.
pub struct TestServer {
    child: Child,
    port: u16,
    _data_dir: TempDir,
}

impl TestServer {
    /// Spawn a new test server on the given port. Every test uses a
    /// distinct port so the suite can run in parallel.
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        let data_dir = tempfile::Builder::new()
            .prefix("confabd-test-")
            .tempdir()?;

        let config_path = data_dir.path().join("config.toml");
        let config_content = format!(
            r#"
[server]
name = "{name}"
bind = "127.0.0.1"
port = {port}

[limits]
login_attempts = 3
default_buffer_size = 100
default_replay_size = 10

[database]
path = "{dir}/confab.db"
"#,
            name = super::SERVER_NAME,
            dir = data_dir.path().display()
        );
        std::fs::write(&config_path, config_content)?;

        let child = Command::new(env!("CARGO_BIN_EXE_confabd"))
            .arg(&config_path)
            .spawn()?;

        let server = Self {
            child,
            port,
            _data_dir: data_dir,
        };
        server.wait_until_ready().await?;
        Ok(server)
    }

    /// Wait until the server is accepting connections.
    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("Server failed to start within 5 seconds")
    }

    /// Get the server address.
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Open a raw connection; the caller reads the banner.
    pub async fn connect(&self) -> anyhow::Result<super::client::TestClient> {
        super::client::TestClient::connect(&self.address()).await
    }

    /// Connect, eat the banner, and register a fresh account.
    #[allow(dead_code)]
    pub async fn connect_registered(
        &self,
        name: &str,
        password: &str,
    ) -> anyhow::Result<super::client::TestClient> {
        let mut client = self.connect().await?;
        client.until_prompt().await?;
        client.register(name, password).await?;
        Ok(client)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // The temp dir cleans itself up; the child does not.
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
