//! Session lifecycle callbacks.

use crate::security::Identity;
use crate::session::Session;

/// Error returned by a lifecycle callback. Never reaches the request.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of session lifecycle events. Every method defaults to a no-op.
pub trait SessionListener: Send + Sync {
    fn on_start(&self, _session: &Session) -> Result<(), HookError> {
        Ok(())
    }

    fn on_login(&self, _session: &Session, _identity: &Identity) -> Result<(), HookError> {
        Ok(())
    }

    fn on_logout(&self, _session: &Session, _identity: &Identity) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs once after the session has left the table.
    fn on_close(&self, _session: &Session) -> Result<(), HookError> {
        Ok(())
    }
}

/// Which callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Start,
    Login,
    Logout,
    Close,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "session_start",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Close => "session_close",
        }
    }
}
