//! Error types for the script execution core.

use thiserror::Error;

use crate::action::ActionId;
use crate::point::ScopeKey;

/// Registration was refused. Nothing was added to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The handler's self-check rejected the registration.
    #[error("script '{script}' failed validation for {point} ({scope}): {reason}")]
    ValidationFailed {
        point: &'static str,
        scope: ScopeKey,
        script: String,
        reason: String,
    },

    /// The same handler instance is already registered for this point and scope.
    #[error("script '{script}' is already registered for {point} ({scope})")]
    AlreadyRegistered {
        point: &'static str,
        scope: ScopeKey,
        script: String,
    },
}

/// Misuse of an action by a content script.
///
/// These are asserted in debug builds; release builds log and return them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    /// A result setter was called on an action that already has its result.
    #[error("result already set for action {action}")]
    AlreadyCompleted { action: ActionId },

    /// A child was added to a multi result after a poll saw it ready.
    #[error("cannot add a child to multi result {action} after it became ready")]
    ChildAfterReady { action: ActionId },
}
