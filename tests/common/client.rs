//! Test client.
//!
//! A line-oriented TCP client for integration testing: send commands,
//! collect reply lines, and assert on what arrives.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

/// A connected test client.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    prompt: String,
}

impl TestClient {
    /// Connect to a test server.
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            prompt: super::prompt(),
        })
    }

    /// Send one line.
    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive a single line within the default timeout.
    pub async fn recv_line(&mut self) -> anyhow::Result<String> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive a line with a timeout. EOF is an error: the tests that
    /// expect a closed connection use [`expect_closed`](Self::expect_closed).
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(dur, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed");
        }
        Ok(line.trim_end().to_string())
    }

    /// Receive lines until the predicate matches; the matching line is
    /// included in the result.
    #[allow(dead_code)]
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            let line = self.recv_line().await?;
            let done = predicate(&line);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Receive lines until the ready prompt; the prompt itself is not
    /// returned.
    pub async fn until_prompt(&mut self) -> anyhow::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.recv_line().await?;
            if line == self.prompt {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    /// Send a command and collect its reply lines up to the next prompt.
    /// Only valid outside channel focus, where prompts flow.
    pub async fn cmd(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        self.send_line(line).await?;
        self.until_prompt().await
    }

    /// Register a fresh account; the caller is logged in afterwards.
    pub async fn register(&mut self, name: &str, password: &str) -> anyhow::Result<()> {
        let lines = self.cmd(&format!("register {name} {password}")).await?;
        if lines.iter().any(|l| l.starts_with("** logged in as")) {
            Ok(())
        } else {
            anyhow::bail!("registration failed: {lines:?}")
        }
    }

    /// Log in to an existing account.
    #[allow(dead_code)]
    pub async fn login(&mut self, name: &str, password: &str) -> anyhow::Result<()> {
        let lines = self.cmd(&format!("login {name} {password}")).await?;
        if lines.iter().any(|l| l.starts_with("** logged in as")) {
            Ok(())
        } else {
            anyhow::bail!("login failed: {lines:?}")
        }
    }

    /// Discard whatever arrives until the line goes quiet.
    #[allow(dead_code)]
    pub async fn drain(&mut self) {
        while self
            .recv_timeout(Duration::from_millis(100))
            .await
            .is_ok()
        {}
    }

    /// Assert no line arrives within the window. Used for negative
    /// delivery checks (mutes, filtered fan-out).
    #[allow(dead_code)]
    pub async fn expect_silence(&mut self, dur: Duration) -> anyhow::Result<()> {
        match self.recv_timeout(dur).await {
            Ok(line) => anyhow::bail!("expected silence, got {line:?}"),
            Err(_) => Ok(()),
        }
    }

    /// Wait for the server to close this connection.
    #[allow(dead_code)]
    pub async fn expect_closed(&mut self) -> anyhow::Result<()> {
        let deadline = Duration::from_secs(5);
        let fut = async {
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
        };
        timeout(deadline, fut)
            .await
            .map_err(|_| anyhow::anyhow!("connection still open"))
    }
}
