//! Unified error handling for confabd.
//!
//! `EngineError` is the taxonomy every core operation speaks; session code
//! maps it onto client-visible response lines.

use thiserror::Error;

// ============================================================================
// Engine Errors (core operations)
// ============================================================================

/// Errors produced by the account directory, channel registry, message
/// router, privilege graph, and moderation store.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no such account: {0}")]
    UnknownAccount(String),

    #[error("authentication failed")]
    BadCredentials,

    /// A second login for an account that already has a live session.
    #[error("the account is already online")]
    AlreadyOnline,

    #[error("name already in use: {0}")]
    DuplicateName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("you are banned from this channel")]
    Banned,

    #[error("wrong channel password")]
    BadChannelPassword,

    #[error("the channel is not accepting new members")]
    ChannelLocked,

    #[error("the channel is archived")]
    ChannelArchived,

    #[error("no such channel: {0}")]
    UnknownChannel(String),

    #[error("you are not in that channel")]
    NotAMember,

    #[error("you do not own that")]
    NotOwner,

    #[error("no such recipient: {0}")]
    UnknownRecipient(String),

    #[error("{parent} -> {child} would create a privilege cycle")]
    CycleError { parent: String, child: String },

    #[error("syntax error: {0}")]
    ProtocolSyntaxError(String),

    #[error("storage error: {0}")]
    Storage(#[from] crate::db::DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Static error code, used for tracing fields and test assertions.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownAccount(_) => "unknown_account",
            Self::BadCredentials => "bad_credentials",
            Self::AlreadyOnline => "already_online",
            Self::DuplicateName(_) => "duplicate_name",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::Banned => "banned",
            Self::BadChannelPassword => "bad_channel_password",
            Self::ChannelLocked => "channel_locked",
            Self::ChannelArchived => "channel_archived",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::NotAMember => "not_a_member",
            Self::NotOwner => "not_owner",
            Self::UnknownRecipient(_) => "unknown_recipient",
            Self::CycleError { .. } => "cycle_error",
            Self::ProtocolSyntaxError(_) => "protocol_syntax_error",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Client-visible response line. Storage and internal faults are
    /// reported but never described to the peer.
    pub fn to_client_line(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => {
                "error: temporary server problem, try again".to_string()
            }
            Self::BadCredentials => "Authentication failed!".to_string(),
            other => format!("error: {other}"),
        }
    }

    /// True when the session should keep counting toward the login lockout.
    #[inline]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::BadCredentials)
    }
}

/// Result type for engine operations and command handlers.
pub type EngineResult<T> = Result<T, EngineError>;
