//! Extension points and the metadata that drives their invocation.
//!
//! An extension point is a zero-sized marker type implementing [`ExtensionPoint`].
//! It names the handler capability (a trait object type) that registrants must
//! implement and fixes how the registry invokes that point: every handler runs
//! ([`HookKind::FireAndForget`]), or the chain stops at the first veto
//! ([`HookKind::Filter`]).

use std::fmt;

use crate::ScriptObject;

/// How the registry walks the handlers of an extension point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Every handler runs; a faulting handler is logged and skipped.
    FireAndForget,
    /// Handlers run in order until one returns [`Verdict::Veto`].
    Filter,
}

impl HookKind {
    /// Whether invocation stops at the first veto
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, HookKind::Filter)
    }
}

/// Narrows a registration to one owning entity (e.g. a spell ID), or leaves it global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    /// Runs for every invocation of the point, after scope-specific handlers
    Global,
    /// Runs only for invocations targeting this ID
    Id(u32),
}

impl ScopeKey {
    pub fn is_global(&self) -> bool {
        matches!(self, ScopeKey::Global)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Global => f.write_str("global"),
            ScopeKey::Id(id) => write!(f, "scope {}", id),
        }
    }
}

impl From<u32> for ScopeKey {
    fn from(id: u32) -> Self {
        ScopeKey::Id(id)
    }
}

/// Outcome of a filter handler, and of a whole filter invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Veto { reason: String },
}

impl Verdict {
    pub fn veto(reason: impl Into<String>) -> Self {
        Verdict::Veto {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn is_veto(&self) -> bool {
        matches!(self, Verdict::Veto { .. })
    }
}

impl From<bool> for Verdict {
    /// `true` allows, `false` vetoes without a reason
    fn from(allowed: bool) -> Self {
        if allowed {
            Verdict::Allow
        } else {
            Verdict::veto("vetoed")
        }
    }
}

/// A typed extension point
///
/// ```ignore
/// pub struct SpellCastCheck;
///
/// impl ExtensionPoint for SpellCastCheck {
///     type Handler = dyn SpellCastScript;
///     const NAME: &'static str = "spell.cast_check";
///     const KIND: HookKind = HookKind::Filter;
/// }
/// ```
pub trait ExtensionPoint: 'static {
    /// The capability a handler must implement to register for this point
    type Handler: ?Sized + ScriptObject + 'static;

    /// Canonical name used in logs and errors
    const NAME: &'static str;

    /// Invocation mode. Metadata of the point, never a per-call choice.
    const KIND: HookKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        assert_eq!(ScopeKey::Global.to_string(), "global");
        assert_eq!(ScopeKey::Id(42).to_string(), "scope 42");
        assert_eq!(ScopeKey::from(7), ScopeKey::Id(7));
    }

    #[test]
    fn test_kind_short_circuit() {
        assert!(HookKind::Filter.is_short_circuit());
        assert!(!HookKind::FireAndForget.is_short_circuit());
    }

    #[test]
    fn test_verdict_from_bool() {
        assert!(Verdict::from(true).is_allow());
        assert!(Verdict::from(false).is_veto());
        assert_eq!(
            Verdict::veto("out of range"),
            Verdict::Veto {
                reason: "out of range".to_string()
            }
        );
    }
}
