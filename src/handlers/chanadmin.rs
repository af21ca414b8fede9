//! `:admin` - channel administration, for the owner, the delegate, or a
//! server administrator. Authorization happens inside the channel actor,
//! which knows the owner and delegate; this handler only shapes requests
//! and replies.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use crate::state::{ChannelEvent, ChannelStatus};
use async_trait::async_trait;

pub struct ChannelAdminHandler;

#[async_trait]
impl Handler for ChannelAdminHandler {
    fn verb(&self) -> &'static str {
        "admin"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Channel]
    }

    fn description(&self) -> &'static str {
        ":admin settings|password|buffer|replay|status|delegate|purge|delete - channel administration"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        let channel = ctx.focus()?;
        let server_admin = ctx.engine.is_server_admin(&who.group).await;

        match args {
            &["settings"] => {
                let summary = ctx
                    .engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::Summary { reply_tx })
                    .await?;
                ctx.reply(format!("channel '{}':", summary.name));
                ctx.reply(format!("  owner: {}", summary.owner));
                ctx.reply(format!(
                    "  delegate: {}",
                    summary.admin_name.as_deref().unwrap_or("none")
                ));
                ctx.reply(format!("  status: {}", summary.status.as_str()));
                ctx.reply(format!(
                    "  buffer: {}, replay: {}",
                    summary.buffer_size, summary.replay_size
                ));
                ctx.reply(format!(
                    "  members: {}, retained lines: {}",
                    summary.member_count, summary.retained
                ));
                ctx.reply(format!(
                    "  password: {}",
                    if summary.has_password { "yes" } else { "no" }
                ));
                Ok(())
            }
            &["password"] => {
                self.set_password(ctx, &who.name, server_admin, &channel, None)
                    .await?;
                ctx.reply("** password cleared");
                Ok(())
            }
            &["password", new] => {
                self.set_password(ctx, &who.name, server_admin, &channel, Some(new.to_string()))
                    .await?;
                ctx.reply("** password updated");
                Ok(())
            }
            &["buffer", size] => {
                let size = parse_size(size)?;
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::SetBuffer {
                        by: who.name.clone(),
                        server_admin,
                        size,
                        reply_tx,
                    })
                    .await??;
                ctx.reply(format!("** buffer resized to {size}"));
                Ok(())
            }
            &["replay", size] => {
                let size = parse_size(size)?;
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::SetReplay {
                        by: who.name.clone(),
                        server_admin,
                        size,
                        reply_tx,
                    })
                    .await??;
                ctx.reply(format!("** replay resized to {size}"));
                Ok(())
            }
            &["status", status] => {
                let status = ChannelStatus::parse(status).ok_or_else(|| {
                    EngineError::ProtocolSyntaxError(format!(
                        "status is open, locked or archived, not {status}"
                    ))
                })?;
                // The actor broadcasts the change to every member.
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::SetStatus {
                        by: who.name.clone(),
                        server_admin,
                        status,
                        reply_tx,
                    })
                    .await??;
                Ok(())
            }
            &["delegate"] => {
                self.set_delegate(ctx, &who.name, &channel, None).await?;
                ctx.reply("** delegation cleared");
                Ok(())
            }
            &["delegate", name] => {
                if ctx.engine.db().accounts().find_by_name(name).await?.is_none() {
                    return Err(EngineError::UnknownAccount(name.to_string()));
                }
                self.set_delegate(ctx, &who.name, &channel, Some(name.to_string()))
                    .await?;
                ctx.reply(format!("** {name} is now the channel administrator"));
                Ok(())
            }
            &["purge"] => {
                ctx.engine
                    .channel_request(&channel, |reply_tx| ChannelEvent::Purge {
                        by: who.name.clone(),
                        server_admin,
                        reply_tx,
                    })
                    .await??;
                ctx.reply("** history purged");
                Ok(())
            }
            &["delete"] => {
                // Every member, this session included, is dropped with a
                // deletion notice; no reply of its own is needed.
                ctx.engine.delete_channel(&who, &channel).await?;
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: :admin settings | password [new] | buffer <n> | replay <n> | \
                 status open|locked|archived | delegate [name] | purge | delete"
                    .to_string(),
            )),
        }
    }
}

impl ChannelAdminHandler {
    async fn set_password(
        &self,
        ctx: &Context<'_>,
        by: &str,
        server_admin: bool,
        channel: &str,
        password: Option<String>,
    ) -> EngineResult<()> {
        ctx.engine
            .channel_request(channel, |reply_tx| ChannelEvent::SetPassword {
                by: by.to_string(),
                server_admin,
                password,
                reply_tx,
            })
            .await?
    }

    async fn set_delegate(
        &self,
        ctx: &Context<'_>,
        by: &str,
        channel: &str,
        delegate: Option<String>,
    ) -> EngineResult<()> {
        ctx.engine
            .channel_request(channel, |reply_tx| ChannelEvent::SetDelegate {
                by: by.to_string(),
                delegate,
                reply_tx,
            })
            .await?
    }
}

fn parse_size(arg: &str) -> EngineResult<usize> {
    arg.parse()
        .map_err(|_| EngineError::ProtocolSyntaxError(format!("not a size: {arg}")))
}
