//! Inbox commands: persistent point-to-point messages.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use async_trait::async_trait;
use chrono::DateTime;

/// Render an epoch timestamp for listings.
pub(super) fn render_time(epoch: i64) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(when) => when.format("%Y-%m-%d %H:%M").to_string(),
        None => "?".to_string(),
    }
}

fn preview(body: &str) -> String {
    const LIMIT: usize = 48;
    if body.chars().count() <= LIMIT {
        return body.to_string();
    }
    let cut: String = body.chars().take(LIMIT).collect();
    format!("{cut}...")
}

pub struct MessagesHandler;

#[async_trait]
impl Handler for MessagesHandler {
    fn verb(&self) -> &'static str {
        "messages"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "messages send <name> <text> | list | read <index> | delete <index>|all"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        match args {
            &["send", name, ref body @ ..] if !body.is_empty() => {
                let body = body.join(" ");
                ctx.engine.send_inbox_message(&who.name, name, &body).await?;
                ctx.reply(format!("** message sent to {name}"));
                Ok(())
            }
            &["list"] => {
                let listing = ctx.engine.inbox_listing(who.id).await?;
                if listing.is_empty() {
                    ctx.reply("your inbox is empty");
                    return Ok(());
                }
                ctx.reply(format!("inbox ({}):", listing.len()));
                for (position, record) in listing.iter().enumerate() {
                    let marker = if record.unread { " [new]" } else { "" };
                    ctx.reply(format!(
                        "  {}.{} from {} at {}: {}",
                        position + 1,
                        marker,
                        record.sender_name,
                        render_time(record.sent_at),
                        preview(&record.body),
                    ));
                }
                Ok(())
            }
            &["read", index] => {
                let index = parse_index(index)?;
                let record = ctx.engine.read_inbox_message(who.id, index).await?;
                ctx.reply(format!(
                    "from {} at {}:",
                    record.sender_name,
                    render_time(record.sent_at)
                ));
                ctx.reply(record.body);
                Ok(())
            }
            &["delete", "all"] => {
                ctx.engine.delete_all_inbox(who.id).await?;
                ctx.reply("** inbox emptied");
                Ok(())
            }
            &["delete", index] => {
                let index = parse_index(index)?;
                ctx.engine.delete_inbox_message(who.id, index).await?;
                ctx.reply(format!("** message {index} deleted"));
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: messages send <name> <text> | messages list | messages read <index> | messages delete <index>|all"
                    .to_string(),
            )),
        }
    }
}

fn parse_index(arg: &str) -> EngineResult<usize> {
    arg.parse()
        .map_err(|_| EngineError::ProtocolSyntaxError(format!("not a message index: {arg}")))
}
