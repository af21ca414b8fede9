//! Pre-login commands: `login` and `register`.

use super::{Context, Handler};
use crate::error::{EngineError, EngineResult};
use crate::session::Scope;
use crate::state::AccountIdentity;
use async_trait::async_trait;
use zeroize::Zeroizing;

/// Shared tail of a successful authentication: bind the identity to the
/// session, show the message of the day and the unread count.
fn announce_login(ctx: &mut Context<'_>, identity: &AccountIdentity) {
    ctx.session.state.login(identity.clone());
    ctx.session.failed_logins = 0;
    if let Some(motd) = ctx.engine.setting("motd") {
        ctx.reply(motd);
    }
    ctx.reply(format!(
        "** logged in as {} ({})",
        identity.name, identity.group
    ));
}

pub struct LoginHandler;

#[async_trait]
impl Handler for LoginHandler {
    fn verb(&self) -> &'static str {
        "login"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Auth]
    }

    fn description(&self) -> &'static str {
        "login <name> <password> - authenticate an existing account"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let &[name, password] = args else {
            return Err(EngineError::ProtocolSyntaxError(
                "usage: login <name> <password>".to_string(),
            ));
        };
        let password = Zeroizing::new(password.to_string());

        let identity = ctx
            .engine
            .authenticate(
                name,
                &password,
                ctx.session.addr.ip(),
                ctx.session.outbound.clone(),
            )
            .await?;

        announce_login(ctx, &identity);
        if let Ok(unread) = ctx.engine.inbox_unread_count(identity.id).await
            && unread > 0
        {
            ctx.reply(format!("** you have {unread} unread inbox messages"));
        }
        Ok(())
    }
}

pub struct RegisterHandler;

#[async_trait]
impl Handler for RegisterHandler {
    fn verb(&self) -> &'static str {
        "register"
    }

    fn scopes(&self) -> &'static [Scope] {
        &[Scope::Auth]
    }

    fn description(&self) -> &'static str {
        "register <name> <password> - create an account and log in"
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()> {
        let &[name, password] = args else {
            return Err(EngineError::ProtocolSyntaxError(
                "usage: register <name> <password>".to_string(),
            ));
        };
        let password = Zeroizing::new(password.to_string());

        let identity = ctx
            .engine
            .register_account(
                name,
                &password,
                ctx.session.addr.ip(),
                ctx.session.outbound.clone(),
            )
            .await?;

        ctx.reply(format!("** account {} created", identity.name));
        announce_login(ctx, &identity);
        Ok(())
    }
}
