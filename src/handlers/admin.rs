//! The server administration console.
//!
//! A single `admin` verb with subcommands. Authorization is checked here
//! rather than at dispatch so that unauthorized attempts are recorded:
//! three strikes and the offending account is expelled, its address
//! blocked.

use super::messages::render_time;
use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use crate::state::ViolationOutcome;
use async_trait::async_trait;
use std::net::IpAddr;

pub struct AdminHandler;

#[async_trait]
impl Handler for AdminHandler {
    fn verb(&self) -> &'static str {
        "admin"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "admin accounts|channels|block|remove|edit|groups|set|settings|shutdown - server administration"
    }

    fn required_group(&self) -> Option<&'static str> {
        Some("administrators")
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        if !ctx.engine.is_server_admin(&who.group).await {
            return match ctx.engine.record_admin_violation(&who.name).await? {
                ViolationOutcome::Warned { remaining } => {
                    ctx.reply("** permission denied; this incident has been recorded");
                    ctx.reply(format!(
                        "** {remaining} warning(s) remain before your account is removed"
                    ));
                    Ok(())
                }
                // The expulsion already queued the closing notice.
                ViolationOutcome::Expelled => Ok(()),
            };
        }

        match args {
            &["accounts"] => self.list_accounts(ctx).await,
            &["channels"] => self.list_channels(ctx).await,
            &["block", "add", addr] => {
                let addr = parse_addr(addr)?;
                ctx.engine.block_address(addr).await?;
                ctx.reply(format!("** blocked {addr}"));
                Ok(())
            }
            &["block", "remove", addr] => {
                let addr = parse_addr(addr)?;
                ctx.engine.unblock_address(addr).await?;
                ctx.reply(format!("** unblocked {addr}"));
                Ok(())
            }
            &["block", "list"] => {
                let blocked = ctx.engine.blocked_snapshot();
                if blocked.is_empty() {
                    ctx.reply("no blocked addresses");
                    return Ok(());
                }
                ctx.reply("blocked addresses:");
                for addr in blocked {
                    ctx.reply(format!("  {addr}"));
                }
                Ok(())
            }
            &["remove", name] => {
                ctx.engine
                    .delete_account(name, "** your account was removed by an administrator")
                    .await?;
                ctx.reply(format!("** account {name} removed"));
                Ok(())
            }
            &["edit", name, "password", new] => {
                ctx.engine.reset_password(name, new).await?;
                ctx.reply(format!("** password reset for {name}"));
                Ok(())
            }
            &["edit", name, "group", group] => {
                ctx.engine.set_account_group(name, group).await?;
                ctx.reply(format!("** {name} is now in {group}"));
                Ok(())
            }
            &["edit", name, "forgive"] => {
                ctx.engine.forgive_account(name).await?;
                ctx.reply(format!("** {name} forgiven"));
                Ok(())
            }
            &["groups", "list"] => self.list_groups(ctx).await,
            &["groups", "add", name] => {
                ctx.engine.create_group(name).await?;
                ctx.reply(format!("** group {name} created"));
                Ok(())
            }
            &["groups", "grant", parent, child] => {
                ctx.engine.grant_edge(parent, child).await?;
                ctx.reply(format!("** {parent} now grants {child}"));
                Ok(())
            }
            &["groups", "revoke", parent, child] => {
                ctx.engine.revoke_edge(parent, child).await?;
                ctx.reply(format!("** {parent} no longer grants {child}"));
                Ok(())
            }
            &["set", key, ref value @ ..] if !value.is_empty() => {
                let value = value.join(" ");
                ctx.engine.set_setting(key, &value).await?;
                ctx.reply(format!("** {key} set"));
                Ok(())
            }
            &["settings"] => {
                let settings = ctx.engine.settings_snapshot();
                if settings.is_empty() {
                    ctx.reply("no settings");
                    return Ok(());
                }
                ctx.reply("settings:");
                for (key, value) in settings {
                    ctx.reply(format!("  {key} = {value}"));
                }
                Ok(())
            }
            &["shutdown"] => {
                ctx.reply("** shutting down");
                ctx.engine.begin_shutdown("** server is shutting down");
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: admin accounts | channels | block add|remove <ip> | block list | \
                 remove <name> | edit <name> password|group <value> | edit <name> forgive | \
                 groups list|add|grant|revoke ... | set <key> <value> | settings | shutdown"
                    .to_string(),
            )),
        }
    }
}

impl AdminHandler {
    async fn list_accounts(&self, ctx: &mut Context<'_>) -> EngineResult<()> {
        let overviews = ctx.engine.account_overviews().await?;
        ctx.reply(format!("accounts ({}):", overviews.len()));
        for account in overviews {
            let presence = if account.online { "online" } else { "offline" };
            ctx.reply(format!(
                "  {} [{}] {presence}, forgiven {}, registered {}",
                account.name,
                account.group,
                account.forgiven,
                render_time(account.registered_at),
            ));
        }
        Ok(())
    }

    async fn list_channels(&self, ctx: &mut Context<'_>) -> EngineResult<()> {
        let summaries = ctx.engine.channel_summaries().await;
        if summaries.is_empty() {
            ctx.reply("no channels");
            return Ok(());
        }
        ctx.reply(format!("channels ({}):", summaries.len()));
        for s in summaries {
            let delegate = match &s.admin_name {
                Some(name) => format!(", delegate {name}"),
                None => String::new(),
            };
            ctx.reply(format!(
                "  {} owner {} [{}] buffer {} replay {}, {} member(s){}{}",
                s.name,
                s.owner,
                s.status.as_str(),
                s.buffer_size,
                s.replay_size,
                s.member_count,
                delegate,
                if s.has_password { ", password" } else { "" },
            ));
        }
        Ok(())
    }

    async fn list_groups(&self, ctx: &mut Context<'_>) -> EngineResult<()> {
        ctx.reply("groups:");
        for (name, reaches) in ctx.engine.group_overviews().await {
            ctx.reply(format!("  {name} (reaches: {})", reaches.join(", ")));
        }
        let edges = ctx.engine.graph_edges().await;
        if edges.is_empty() {
            ctx.reply("no edges");
            return Ok(());
        }
        ctx.reply("edges:");
        for (parent, child) in edges {
            ctx.reply(format!("  {parent} -> {child}"));
        }
        Ok(())
    }
}

fn parse_addr(arg: &str) -> EngineResult<IpAddr> {
    arg.parse()
        .map_err(|_| EngineError::ProtocolSyntaxError(format!("not an IP address: {arg}")))
}
