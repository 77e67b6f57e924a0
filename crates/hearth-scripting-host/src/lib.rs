//! Script execution core for the hearth game server
//!
//! Three pieces make up the core:
//! - [`HookRegistry`]: typed extension points that content scripts attach handlers to
//! - [`ActionScheduler`]: tick-polled actions that let a script wait across ticks
//! - [`WorkQueue`]: the thread-safe handoff from IO threads into the simulation thread
//!
//! The registry and scheduler are single-threaded and run on the simulation tick.
//! Anything produced on another thread reaches them through a `WorkQueue`.

use std::any::Any;

pub mod action;
pub mod error;
pub mod point;
pub mod points;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use action::{Action, ActionId, ActionResultSetter, ActionState, MultiActionResult};
pub use error::{ActionError, RegistrationError};
pub use point::{ExtensionPoint, HookKind, ScopeKey, Verdict};
pub use queue::WorkQueue;
pub use registry::HookRegistry;
pub use scheduler::{ActionScheduler, PollReport};

/// Common capability of everything a content module can register
pub trait ScriptObject {
    /// Script identity used in logs and for bulk unregistration
    fn script_name(&self) -> &str;

    /// Self-check run once at registration time
    ///
    /// Return an error (e.g. "spell 1234 does not exist") to refuse the registration.
    fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Best-effort text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
