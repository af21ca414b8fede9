//! Contact list commands.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use async_trait::async_trait;

pub struct ContactsHandler;

#[async_trait]
impl Handler for ContactsHandler {
    fn verb(&self) -> &'static str {
        "contacts"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "contacts add|remove <name> | contacts list - manage your contacts"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        match args {
            &["add", name] => {
                ctx.engine.add_contact(&who, name).await?;
                ctx.reply(format!("** {name} added to your contacts"));
                Ok(())
            }
            &["remove", name] => {
                ctx.engine.remove_contact(&who, name).await?;
                ctx.reply(format!("** {name} removed from your contacts"));
                Ok(())
            }
            &["list"] => {
                let contacts = ctx.engine.contacts_with_presence(who.id).await?;
                if contacts.is_empty() {
                    ctx.reply("you have no contacts");
                    return Ok(());
                }
                ctx.reply(format!("contacts ({}):", contacts.len()));
                for (name, online) in contacts {
                    let presence = if online { "online" } else { "offline" };
                    ctx.reply(format!("  {name} ({presence})"));
                }
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: contacts add|remove <name> | contacts list".to_string(),
            )),
        }
    }
}
