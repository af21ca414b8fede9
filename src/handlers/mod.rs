//! Command handlers and dispatch.
//!
//! Every wire verb is a [`Handler`] registered under a `(Scope, verb)` key,
//! so the same word can mean different things at the menu and inside a
//! channel (`exit`, `admin`). The registry also owns the two discovery
//! commands: `help` renders the catalog for humans, and any verb ending in
//! the sentinel returns it as a single JSON object for client tooling. Both
//! show only the verbs the session's privilege group can reach.

mod admin;
mod auth;
mod chanadmin;
mod contacts;
mod focus;
mod menu;
mod messages;
mod options;

use crate::error::{EngineError, EngineResult};
use crate::session::{Scope, SessionCtx};
use crate::state::{AccountIdentity, Engine, Outbound};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Verb suffix that requests the machine-readable command map.
pub const HELP_SENTINEL: &str = "__json_help__";

/// Everything a handler may touch: the shared engine and the session it is
/// serving. Replies go through the session's outbound queue, never directly
/// to the socket.
pub struct Context<'a> {
    pub engine: &'a Arc<Engine>,
    pub session: &'a mut SessionCtx,
}

impl Context<'_> {
    /// Queue one line for the peer. A closed queue means the session is
    /// already tearing down, so the line is dropped.
    pub fn reply(&self, line: impl Into<String>) {
        let _ = self.session.outbound.send(Outbound::Line(line.into()));
    }

    /// The logged-in identity. Handlers registered outside [`Scope::Auth`]
    /// can rely on this being present.
    pub fn identity(&self) -> EngineResult<AccountIdentity> {
        self.session
            .state
            .identity()
            .cloned()
            .ok_or_else(|| EngineError::Internal("session has no identity".to_string()))
    }

    /// The focused channel name. Reliable inside [`Scope::Channel`].
    pub fn focus(&self) -> EngineResult<String> {
        self.session
            .state
            .focus()
            .map(str::to_string)
            .ok_or_else(|| EngineError::Internal("session has no channel focus".to_string()))
    }
}

/// A single wire verb.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The verb as typed, lowercase, without the channel `:` prefix.
    fn verb(&self) -> &'static str;

    /// The scopes in which the verb is available.
    fn scopes(&self) -> &'static [Scope];

    /// One usage line, starting with the verb as the client types it.
    /// Serves both `help` and the sentinel.
    fn description(&self) -> &'static str;

    /// Privilege group required for the verb to be advertised. Enforcement
    /// stays inside the handler so that unauthorized attempts can still be
    /// observed and recorded.
    fn required_group(&self) -> Option<&'static str> {
        None
    }

    async fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> EngineResult<()>;
}

/// Registry of command handlers, keyed by scope and verb.
pub struct Registry {
    handlers: HashMap<(Scope, &'static str), Arc<dyn Handler>>,
}

impl Registry {
    /// The full command surface.
    pub fn standard() -> Self {
        let mut registry = Registry {
            handlers: HashMap::new(),
        };

        registry.register(Arc::new(auth::LoginHandler));
        registry.register(Arc::new(auth::RegisterHandler));
        registry.register(Arc::new(menu::ExitHandler));

        registry.register(Arc::new(menu::ChannelHandler));
        registry.register(Arc::new(menu::WhoamiHandler));
        registry.register(Arc::new(menu::LogoutHandler));
        registry.register(Arc::new(contacts::ContactsHandler));
        registry.register(Arc::new(messages::MessagesHandler));
        registry.register(Arc::new(options::OptionsHandler));
        registry.register(Arc::new(admin::AdminHandler));

        registry.register(Arc::new(focus::LeaveHandler));
        registry.register(Arc::new(focus::MembersHandler));
        registry.register(Arc::new(focus::MuteHandler));
        registry.register(Arc::new(focus::WhisperHandler));
        registry.register(Arc::new(focus::InviteHandler));
        registry.register(Arc::new(focus::BanHandler));
        registry.register(Arc::new(focus::KickHandler));
        registry.register(Arc::new(chanadmin::ChannelAdminHandler));

        registry
    }

    fn register(&mut self, handler: Arc<dyn Handler>) {
        for scope in handler.scopes() {
            self.handlers
                .insert((*scope, handler.verb()), Arc::clone(&handler));
        }
    }

    /// Route one parsed command. `verb` is already lowercased and stripped
    /// of the channel `:` prefix.
    pub async fn dispatch(
        &self,
        ctx: &mut Context<'_>,
        verb: &str,
        args: &[&str],
    ) -> EngineResult<()> {
        let scope = ctx.session.state.scope();
        if verb.ends_with(HELP_SENTINEL) {
            return self.json_help(ctx, scope).await;
        }
        if verb == "help" {
            return self.render_help(ctx, scope, args).await;
        }
        match self.handlers.get(&(scope, verb)) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                handler.handle(ctx, args).await
            }
            None => Err(EngineError::ProtocolSyntaxError(format!(
                "unknown command: {verb}"
            ))),
        }
    }

    /// The catalog visible to this session: every handler in scope whose
    /// required group the session's group reaches.
    async fn visible_entries(&self, ctx: &Context<'_>, scope: Scope) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        for ((entry_scope, _), handler) in &self.handlers {
            if *entry_scope != scope || !self.visible(ctx, handler.as_ref()).await {
                continue;
            }
            entries.push((
                display_verb(scope, handler.verb()),
                handler.description().to_string(),
            ));
        }
        entries.push((
            display_verb(scope, "help"),
            format!("{} [command] - describe the available commands", display_verb(scope, "help")),
        ));
        entries.sort();
        entries
    }

    async fn visible(&self, ctx: &Context<'_>, handler: &dyn Handler) -> bool {
        match handler.required_group() {
            None => true,
            Some(required) => match ctx.session.state.identity() {
                Some(who) => ctx.engine.group_grants(&who.group, required).await,
                None => false,
            },
        }
    }

    async fn render_help(
        &self,
        ctx: &mut Context<'_>,
        scope: Scope,
        args: &[&str],
    ) -> EngineResult<()> {
        if let Some(wanted) = args.first() {
            let wanted = wanted.trim_start_matches(':').to_ascii_lowercase();
            if wanted == "help" {
                ctx.reply(format!(
                    "{} [command] - describe the available commands",
                    display_verb(scope, "help")
                ));
                return Ok(());
            }
            if let Some(handler) = self.handlers.get(&(scope, wanted.as_str()))
                && self.visible(ctx, handler.as_ref()).await
            {
                ctx.reply(handler.description().to_string());
                return Ok(());
            }
            return Err(EngineError::ProtocolSyntaxError(format!(
                "unknown command: {wanted}"
            )));
        }

        ctx.reply("commands:");
        for (_, description) in self.visible_entries(ctx, scope).await {
            ctx.reply(format!("  {description}"));
        }
        Ok(())
    }

    /// One line of JSON mapping each visible verb to its description. The
    /// prompt after it is suppressed so clients can parse the reply alone.
    async fn json_help(&self, ctx: &mut Context<'_>, scope: Scope) -> EngineResult<()> {
        let map: BTreeMap<String, String> =
            self.visible_entries(ctx, scope).await.into_iter().collect();
        let encoded = serde_json::to_string(&map)
            .map_err(|e| EngineError::Internal(format!("help encoding: {e}")))?;
        ctx.reply(encoded);
        ctx.session.suppress_prompt = true;
        Ok(())
    }
}

/// The verb as the client types it in the given scope.
fn display_verb(scope: Scope, verb: &str) -> String {
    match scope {
        Scope::Channel => format!(":{verb}"),
        _ => verb.to_string(),
    }
}
