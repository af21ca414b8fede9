//! Main-menu commands: channel entry, identity, logout, exit.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use async_trait::async_trait;

/// `channel open|create|list` - the way into a channel.
pub struct ChannelHandler;

#[async_trait]
impl Handler for ChannelHandler {
    fn verb(&self) -> &'static str {
        "channel"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "channel open <name> [password] | create <name> <buffer> <replay> [password] | list"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        match args {
            &["open", name] => self.open(ctx, name, None).await,
            &["open", name, password] => self.open(ctx, name, Some(password.to_string())).await,
            &["create", name, buffer, replay] => {
                let (buffer, replay) = (parse_size(buffer)?, parse_size(replay)?);
                ctx.engine
                    .create_channel(&who, name, buffer, replay, None, &ctx.session.outbound)
                    .await?;
                ctx.session.state.enter_channel(name);
                Ok(())
            }
            &["create", name, buffer, replay, password] => {
                let (buffer, replay) = (parse_size(buffer)?, parse_size(replay)?);
                ctx.engine
                    .create_channel(&who, name, buffer, replay, Some(password), &ctx.session.outbound)
                    .await?;
                ctx.session.state.enter_channel(name);
                Ok(())
            }
            &["list"] => {
                let summaries = ctx.engine.channel_summaries().await;
                if summaries.is_empty() {
                    ctx.reply("no channels yet");
                    return Ok(());
                }
                ctx.reply("channels:");
                for s in summaries {
                    ctx.reply(format!(
                        "  {} [{}] {} member(s){}",
                        s.name,
                        s.status.as_str(),
                        s.member_count,
                        if s.has_password { ", password" } else { "" },
                    ));
                }
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: channel open <name> [password] | channel create <name> <buffer> <replay> [password] | channel list"
                    .to_string(),
            )),
        }
    }
}

impl ChannelHandler {
    async fn open(
        &self,
        ctx: &mut Context<'_>,
        name: &str,
        password: Option<String>,
    ) -> EngineResult<()> {
        let who = ctx.identity()?;
        ctx.engine
            .open_channel(&who, name, password, &ctx.session.outbound)
            .await?;
        ctx.session.state.enter_channel(name);
        Ok(())
    }
}

fn parse_size(arg: &str) -> EngineResult<usize> {
    arg.parse().map_err(|_| {
        EngineError::ProtocolSyntaxError(format!("not a size: {arg}"))
    })
}

/// `whoami` - identity, group, and every group it reaches.
pub struct WhoamiHandler;

#[async_trait]
impl Handler for WhoamiHandler {
    fn verb(&self) -> &'static str {
        "whoami"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "whoami - show your account, group, and capabilities"
    }

    async fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        let caps = ctx.engine.effective_capabilities(&who.group).await;
        ctx.reply(format!("account: {}", who.name));
        ctx.reply(format!("group: {}", caps.group));
        ctx.reply(format!("capabilities: {}", caps.reaches.join(", ")));
        Ok(())
    }
}

/// `logout` - back to the unauthenticated menu.
pub struct LogoutHandler;

#[async_trait]
impl Handler for LogoutHandler {
    fn verb(&self) -> &'static str {
        "logout"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "logout - log out and return to the login prompt"
    }

    async fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        ctx.engine.deauthenticate(&who.name, &ctx.session.outbound);
        ctx.session.state.logout();
        ctx.reply("** logged out");
        Ok(())
    }
}

/// `exit` - close the connection. Available before and after login.
pub struct ExitHandler;

#[async_trait]
impl Handler for ExitHandler {
    fn verb(&self) -> &'static str {
        "exit"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Auth, Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "exit - close the connection"
    }

    async fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> EngineResult<()> {
        ctx.reply("** goodbye");
        ctx.session.quit = true;
        Ok(())
    }
}
