//! Per-connection session driver.
//!
//! One task per accepted socket. Inbound bytes are framed into lines, every
//! other actor in the process reaches this session through its outbound
//! queue, and a `select!` loop reduces the three event sources (socket,
//! queue, server shutdown) to a small set of outcomes. All writes to the
//! peer go through the queue so that command replies, channel fan-out, and
//! prompts keep their order.

mod machine;

pub use machine::{Scope, SessionState};

use crate::error::EngineError;
use crate::handlers::{Context, Registry};
use crate::state::{Engine, Outbound, OutboundSender};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info};

/// Mutable per-session facts shared with the command handlers.
pub struct SessionCtx {
    pub addr: SocketAddr,
    pub state: SessionState,
    pub outbound: OutboundSender,
    /// Set by the help sentinel: the prompt after this command is skipped.
    pub suppress_prompt: bool,
    /// Set by `exit` and by lockout: close after the queue drains.
    pub quit: bool,
    pub failed_logins: u32,
}

/// What one `select!` round decided.
enum SessionOutcome {
    /// A complete inbound line.
    Inbound(String),
    /// The peer sent a line longer than the configured limit.
    InputTooLong,
    /// Something queued for the peer.
    Queued(Outbound),
    /// Socket closed or errored; tear down.
    Closed,
    /// The server is shutting down.
    ServerShutdown,
}

/// Drive one connection to completion. The address has already passed the
/// block list.
pub async fn run_session(
    engine: Arc<Engine>,
    registry: Arc<Registry>,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let codec = LinesCodec::new_with_max_length(engine.limits().max_line_length);
    let mut framed = Framed::new(stream, codec);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut shutdown_rx = engine.subscribe_shutdown();

    let mut ctx = SessionCtx {
        addr,
        state: SessionState::Authenticating,
        outbound: tx,
        suppress_prompt: false,
        quit: false,
        failed_logins: 0,
    };

    let prompt = format!("[{}] Command:", engine.server_name());
    if greet(&mut framed, &engine, &prompt).await.is_err() {
        debug!(%addr, "Peer gone before the banner");
        return;
    }

    loop {
        let outcome = tokio::select! {
            read = framed.next() => match read {
                Some(Ok(line)) => SessionOutcome::Inbound(line),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => SessionOutcome::InputTooLong,
                Some(Err(LinesCodecError::Io(e))) => {
                    debug!(%addr, error = %e, "Read failed");
                    SessionOutcome::Closed
                }
                None => SessionOutcome::Closed,
            },
            queued = rx.recv() => match queued {
                Some(item) => SessionOutcome::Queued(item),
                None => SessionOutcome::Closed,
            },
            _ = shutdown_rx.recv() => SessionOutcome::ServerShutdown,
        };

        match outcome {
            SessionOutcome::Inbound(raw) => {
                let line = raw.strip_suffix('\r').unwrap_or(&raw);
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&engine, &registry, &mut ctx, line).await;
                queue_prompt(&ctx, &prompt);
                if ctx.quit {
                    break;
                }
            }
            SessionOutcome::InputTooLong => {
                ctx.suppress_prompt = false;
                let _ = ctx.outbound.send(Outbound::Line("error: line too long".to_string()));
                queue_prompt(&ctx, &prompt);
            }
            SessionOutcome::Queued(Outbound::Line(line)) => {
                if framed.send(line).await.is_err() {
                    break;
                }
            }
            SessionOutcome::Queued(Outbound::FocusDropped { channel, notice }) => {
                if ctx.state.focus() == Some(channel.as_str()) {
                    ctx.state.leave_channel();
                    if framed.send(notice).await.is_err() || framed.send(prompt.clone()).await.is_err() {
                        break;
                    }
                }
            }
            SessionOutcome::Queued(Outbound::Shutdown { notice }) => {
                let _ = framed.send(notice).await;
                break;
            }
            SessionOutcome::Closed => break,
            SessionOutcome::ServerShutdown => {
                // Logged-in sessions already have their notice queued; a
                // peer still at the login prompt gets one here.
                if ctx.state.identity().is_none() {
                    let _ = framed.send("** server is shutting down".to_string()).await;
                }
                break;
            }
        }
    }

    // Flush whatever the handlers and actors queued before the break.
    rx.close();
    while let Ok(item) = rx.try_recv() {
        match item {
            Outbound::Line(line) => {
                let _ = framed.send(line).await;
            }
            Outbound::Shutdown { notice } => {
                let _ = framed.send(notice).await;
            }
            Outbound::FocusDropped { .. } => {}
        }
    }

    if let Some(who) = ctx.state.identity().cloned() {
        if let Some(channel) = ctx.state.focus().map(str::to_string) {
            engine.leave_channel(&channel, &who.name).await;
        }
        engine.deauthenticate(&who.name, &ctx.outbound);
    }
    info!(%addr, "Connection closed");
}

/// Banner plus the first prompt. Direct writes are safe here: nothing can
/// be queued before the session exists anywhere else.
async fn greet(
    framed: &mut Framed<TcpStream, LinesCodec>,
    engine: &Engine,
    prompt: &str,
) -> Result<(), LinesCodecError> {
    framed
        .send(format!("** welcome to '{}'", engine.server_name()))
        .await?;
    framed
        .send("** login <name> <password> or register <name> <password>; help lists commands".to_string())
        .await?;
    framed.send(prompt.to_string()).await?;
    Ok(())
}

/// Queue the ready prompt when one is due: not inside a channel, not after
/// the sentinel, not on the way out.
fn queue_prompt(ctx: &SessionCtx, prompt: &str) {
    if ctx.quit || ctx.suppress_prompt || ctx.state.scope() == Scope::Channel {
        return;
    }
    let _ = ctx.outbound.send(Outbound::Line(prompt.to_string()));
}

/// Parse and execute one inbound line. While focused, a bare line is a post
/// and commands carry a `:` prefix; everywhere else the line starts with
/// the verb.
async fn handle_line(engine: &Arc<Engine>, registry: &Registry, ctx: &mut SessionCtx, line: &str) {
    ctx.suppress_prompt = false;
    let scope = ctx.state.scope();

    if scope == Scope::Channel && !line.starts_with(':') {
        let (author, channel) = match (ctx.state.identity(), ctx.state.focus()) {
            (Some(who), Some(channel)) => (who.name.clone(), channel.to_string()),
            _ => return,
        };
        if let Err(err) = engine.post_channel_message(&channel, &author, line).await {
            report_error(engine, ctx, err);
        }
        return;
    }

    let stripped = if scope == Scope::Channel {
        line.strip_prefix(':').unwrap_or(line)
    } else {
        line
    };
    let mut parts = stripped.split_whitespace();
    let Some(verb) = parts.next() else {
        return;
    };
    let verb = verb.to_ascii_lowercase();
    let args: Vec<&str> = parts.collect();

    let mut hctx = Context {
        engine,
        session: ctx,
    };
    if let Err(err) = registry.dispatch(&mut hctx, &verb, &args).await {
        report_error(engine, ctx, err);
    }
}

/// Map an engine error onto the session: log what the operator needs, tell
/// the peer what it may know, and count login failures toward the lockout.
fn report_error(engine: &Engine, ctx: &mut SessionCtx, err: EngineError) {
    if matches!(err, EngineError::Storage(_) | EngineError::Internal(_)) {
        error!(addr = %ctx.addr, error = %err, "Command failed");
    }

    let mut lockout = false;
    if ctx.state.scope() == Scope::Auth && err.is_auth_failure() {
        ctx.failed_logins += 1;
        lockout = ctx.failed_logins >= engine.limits().login_attempts;
    }

    let _ = ctx.outbound.send(Outbound::Line(err.to_client_line()));
    if lockout {
        let _ = ctx
            .outbound
            .send(Outbound::Line("** too many failed attempts".to_string()));
        ctx.quit = true;
    }
}
