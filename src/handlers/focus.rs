//! Channel-focus commands, the `:` verbs typed inside a channel.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use crate::state::{ChannelEvent, WhisperOutcome};
use async_trait::async_trait;

/// `:exit` - leave the channel, back to the menu.
pub struct LeaveHandler;

#[async_trait]
impl Handler for LeaveHandler {
    fn verb(&self) -> &'static str {
        "exit"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":exit - leave the channel"
    }

    async fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        ctx.engine.leave_channel(&channel, &who.name).await;
        ctx.session.state.leave_channel();
        ctx.reply(format!("** left '{channel}'"));
        Ok(())
    }
}

/// `:list` - members, with your mutes marked.
pub struct MembersHandler;

#[async_trait]
impl Handler for MembersHandler {
    fn verb(&self) -> &'static str {
        "list"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":list - show who is here"
    }

    async fn handle(&self, ctx: &mut Context<'_>, _args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        let members = ctx
            .engine
            .channel_request(&channel, |reply_tx| ChannelEvent::ListMembers {
                requester: who.name.clone(),
                reply_tx,
            })
            .await?;
        ctx.reply(format!("members ({}):", members.len()));
        for (name, muted) in members {
            let marker = if muted { " [muted]" } else { "" };
            ctx.reply(format!("  {name}{marker}"));
        }
        Ok(())
    }
}

/// `:mute add|remove|list` - hide an author's lines from yourself.
pub struct MuteHandler;

#[async_trait]
impl Handler for MuteHandler {
    fn verb(&self) -> &'static str {
        "mute"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":mute add|remove <name> | :mute list - hide an author's lines from yourself"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        match args {
            &["add", name] => {
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::Mute {
                        owner: who.name.clone(),
                        target: name.to_string(),
                        reply_tx,
                    })
                    .await??;
                ctx.reply(format!("** {name} muted"));
                Ok(())
            }
            &["remove", name] => {
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::Unmute {
                        owner: who.name.clone(),
                        target: name.to_string(),
                        reply_tx,
                    })
                    .await??;
                ctx.reply(format!("** {name} unmuted"));
                Ok(())
            }
            &["list"] => {
                let muted = ctx
                    .engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::ListMutes {
                        owner: who.name.clone(),
                        reply_tx,
                    })
                    .await?;
                if muted.is_empty() {
                    ctx.reply("you have muted nobody");
                } else {
                    ctx.reply(format!("muted: {}", muted.join(", ")));
                }
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: :mute add|remove <name> | :mute list".to_string(),
            )),
        }
    }
}

/// `:whisper` - a direct line to a co-present member, falling back to the
/// inbox when the target is absent or has muted the sender.
pub struct WhisperHandler;

#[async_trait]
impl Handler for WhisperHandler {
    fn verb(&self) -> &'static str {
        "whisper"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":whisper <name> <text> - speak to one member; absent members get it by inbox"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let &[to, ref body @ ..] = args else {
            return Err(EngineError::ProtocolSyntaxError(
                "usage: :whisper <name> <text>".to_string(),
            ));
        };
        if body.is_empty() {
            return Err(EngineError::ProtocolSyntaxError(
                "usage: :whisper <name> <text>".to_string(),
            ));
        }
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        let body = body.join(" ");

        match ctx.engine.whisper(&channel, &who.name, to, &body).await? {
            WhisperOutcome::Delivered => {
                ctx.reply(format!("** whispered to {to}"));
            }
            WhisperOutcome::Absent => {
                let stored = format!("(whisper in '{channel}') {body}");
                ctx.engine
                    .send_inbox_message(&who.name, to, &stored)
                    .await?;
                ctx.reply(format!("** {to} is not here; delivered to their inbox"));
            }
        }
        Ok(())
    }
}

/// `:invite` - inbox invitation plus a one-shot pass through the channel's
/// lock and password. Bans still apply.
pub struct InviteHandler;

#[async_trait]
impl Handler for InviteHandler {
    fn verb(&self) -> &'static str {
        "invite"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":invite <name> - invite an account; their next join skips lock and password"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let &[name] = args else {
            return Err(EngineError::ProtocolSyntaxError(
                "usage: :invite <name>".to_string(),
            ));
        };
        let who = ctx.identity()?;
        let channel = ctx.focus()?;

        // Inbox delivery first: it validates that the account exists.
        ctx.engine
            .send_inbox_message(
                &who.name,
                name,
                &format!("you are invited to '{channel}'"),
            )
            .await?;
        ctx.engine.invite_to_channel(&channel, name).await?;
        ctx.reply(format!("** invited {name}"));
        Ok(())
    }
}

/// `:ban add|remove|list` - channel bans. Owner, delegate, or server
/// administrator only; banning a member removes them on the spot.
pub struct BanHandler;

#[async_trait]
impl Handler for BanHandler {
    fn verb(&self) -> &'static str {
        "ban"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":ban add|remove <name> | :ban list - channel bans (owner/admin)"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        let server_admin = ctx.engine.is_server_admin(&who.group).await;
        match args {
            &["add", name] => {
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::Ban {
                        by: who.name.clone(),
                        server_admin,
                        target: name.to_string(),
                        reply_tx,
                    })
                    .await??;
                ctx.reply(format!("** {name} banned"));
                Ok(())
            }
            &["remove", name] => {
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::Unban {
                        by: who.name.clone(),
                        server_admin,
                        target: name.to_string(),
                        reply_tx,
                    })
                    .await??;
                ctx.reply(format!("** {name} unbanned"));
                Ok(())
            }
            &["list"] => {
                let bans = ctx
                    .engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::ListBans {
                        by: who.name.clone(),
                        server_admin,
                        reply_tx,
                    })
                    .await??;
                if bans.is_empty() {
                    ctx.reply("no bans");
                } else {
                    ctx.reply(format!("banned: {}", bans.join(", ")));
                }
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: :ban add|remove <name> | :ban list".to_string(),
            )),
        }
    }
}

/// `:kick` - forced removal without a ban.
pub struct KickHandler;

#[async_trait]
impl Handler for KickHandler {
    fn verb(&self) -> &'static str {
        "kick"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":kick <name> - remove a member (owner/admin)"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let &[name] = args else {
            return Err(EngineError::ProtocolSyntaxError(
                "usage: :kick <name>".to_string(),
            ));
        };
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        let server_admin = ctx.engine.is_server_admin(&who.group).await;

        let removed = ctx
            .engine
            .channel_request(&channel, |reply_tx| ChannelEvent::Kick {
                by: who.name.clone(),
                server_admin,
                target: name.to_string(),
                reply_tx,
            })
            .await??;
        if !removed {
            ctx.reply(format!("** {name} is not here"));
        }
        Ok(())
    }
}
