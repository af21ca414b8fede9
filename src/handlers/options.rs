//! Self-service account options.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use async_trait::async_trait;
use zeroize::Zeroizing;

pub struct OptionsHandler;

#[async_trait]
impl Handler for OptionsHandler {
    fn verb(&self) -> &'static str {
        "options"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Menu]
    }

    fn description(&self) -> &'static str {
        "options password <old> <new> | options purge messages|contacts|everything"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let who = ctx.identity()?;
        match args {
            &["password", old, new] => {
                let old = Zeroizing::new(old.to_string());
                let new = Zeroizing::new(new.to_string());
                ctx.engine.verify_password(&who.name, &old).await?;
                ctx.engine.change_password(who.id, &new).await?;
                ctx.reply("** password changed");
                Ok(())
            }
            &["purge", "messages"] => {
                ctx.engine.delete_all_inbox(who.id).await?;
                ctx.reply("** inbox purged");
                Ok(())
            }
            &["purge", "contacts"] => {
                ctx.engine.clear_contacts(who.id).await?;
                ctx.reply("** contacts purged");
                Ok(())
            }
            &["purge", "everything"] => {
                ctx.engine.delete_all_inbox(who.id).await?;
                ctx.engine.clear_contacts(who.id).await?;
                ctx.reply("** inbox and contacts purged");
                Ok(())
            }
            _ => Err(EngineError::ProtocolSyntaxError(
                "usage: options password <old> <new> | options purge messages|contacts|everything"
                    .to_string(),
            )),
        }
    }
}
