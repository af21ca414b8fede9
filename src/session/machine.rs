//! Session lifecycle state machine.
//!
//! Every connection walks the same path: it must authenticate before it can
//! see the menu, and it must hold the menu before it can focus a channel.
//! Posting is only possible while focused.
//!
//! ```text
//! ┌────────────┐  login/register  ┌────────┐  channel open/create  ┌───────────┐
//! │ Authenti-  ├─────────────────►│  Idle  ├──────────────────────►│  Focused  │
//! │ cating     │◄─────────────────┤ (menu) │◄──────────────────────┤ (channel) │
//! └────────────┘      logout      └────┬───┘    :exit / kick /     └─────┬─────┘
//!        │                             │        ban / delete             │
//!        │                             ▼                                 │
//!        │                       ┌──────────────┐                        │
//!        └──────────────────────►│ Disconnected │◄───────────────────────┘
//!          too many failures     └──────────────┘   exit / shutdown
//! ```
//!
//! `Connecting` and `Disconnected` never appear as variants: the first is the
//! instant before the banner is written, the second is the event loop
//! returning. Command dispatch keys off [`Scope`], derived from the state, so
//! a menu verb is structurally unreachable from an unauthenticated session.

use crate::state::AccountIdentity;

/// Which command table a session currently has access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// Pre-login: only `login` and `register`.
    Auth,
    /// Logged in, not focused on a channel.
    Menu,
    /// Focused on a channel; bare lines become posts, verbs start with `:`.
    Channel,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Auth => "auth",
            Scope::Menu => "menu",
            Scope::Channel => "channel",
        }
    }
}

/// Runtime session state. Transitions consume events from the command
/// handlers; the event loop never mutates this directly.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Connected, banner sent, not yet authenticated.
    Authenticating,
    /// Authenticated, at the main menu.
    Idle(AccountIdentity),
    /// Authenticated and focused on the named channel.
    Focused(AccountIdentity, String),
}

impl SessionState {
    pub fn scope(&self) -> Scope {
        match self {
            SessionState::Authenticating => Scope::Auth,
            SessionState::Idle(_) => Scope::Menu,
            SessionState::Focused(..) => Scope::Channel,
        }
    }

    /// The authenticated identity, if any.
    pub fn identity(&self) -> Option<&AccountIdentity> {
        match self {
            SessionState::Authenticating => None,
            SessionState::Idle(who) | SessionState::Focused(who, _) => Some(who),
        }
    }

    /// The focused channel name, if any.
    pub fn focus(&self) -> Option<&str> {
        match self {
            SessionState::Focused(_, channel) => Some(channel.as_str()),
            _ => None,
        }
    }

    /// Authentication succeeded; the session lands at the menu.
    pub fn login(&mut self, who: AccountIdentity) {
        *self = SessionState::Idle(who);
    }

    /// Back to the pre-login prompt. Dropping any focus is the caller's
    /// problem; the state itself just forgets the identity.
    pub fn logout(&mut self) {
        *self = SessionState::Authenticating;
    }

    /// Enter a channel. Meaningless before login, so it keeps the current
    /// state in that case.
    pub fn enter_channel(&mut self, channel: &str) {
        if let Some(who) = self.identity().cloned() {
            *self = SessionState::Focused(who, channel.to_string());
        }
    }

    /// Leave the focused channel and return to the menu.
    pub fn leave_channel(&mut self) {
        if let SessionState::Focused(who, _) = self {
            *self = SessionState::Idle(who.clone());
        }
    }
}
