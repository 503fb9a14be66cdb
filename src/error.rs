//! Unified error type for the listener.
//!
//! A single `Error` enum that every fatal path converts into, keeping the
//! bootstrap's error handling uniform.  Recoverable conditions (malformed
//! messages, debounce, reconnects, lost counts) never surface here; they
//! are reported as [`AppEvent`](crate::app::events::AppEvent)s instead.

use core::fmt;

use crate::app::ports::{PersistenceError, TransportError};
use crate::config::ConfigError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fatal startup or shutdown failure funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// The initial broker connection could not be established.
    Transport(TransportError),
    /// The count store could not be opened.
    Persistence(PersistenceError),
    /// A collaborator was not wired or a worker failed to start.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Persistence(e) => write!(f, "persistence: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Persistence(e) => Some(e),
            Self::Init(_) => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<PersistenceError> for Error {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
