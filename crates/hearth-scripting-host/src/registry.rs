//! Hook registry: typed, scope-aware dispatch to script handlers.
//!
//! Handlers are shared with the content module that created them (`Rc`), and the
//! registry only ever calls `&self` capability methods on them. All methods take
//! `&self`; the tables live in a `RefCell` so a handler may register or unregister
//! (itself included) while an invocation is running. Invocation walks a snapshot,
//! so such changes take effect from the next call.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

use crate::error::RegistrationError;
use crate::point::{ExtensionPoint, HookKind, ScopeKey, Verdict};
use crate::{panic_message, ScriptObject};

/// One registered handler
struct HandlerEntry {
    /// `Rc<P::Handler>` for the point this entry was registered under
    handler: Box<dyn Any>,
    /// Data address of the handler, used for identity on unregister
    addr: usize,
    script: String,
    /// Registration order; entries are never reordered
    seq: u64,
}

fn handler_addr<H: ?Sized>(handler: &Rc<H>) -> usize {
    Rc::as_ptr(handler) as *const () as usize
}

type PointKey = (TypeId, ScopeKey);

/// Registry of script handlers keyed by extension point and scope
///
/// Lookup for `ScopeKey::Id(x)` yields the handlers registered for `x` followed by
/// the global ones, each group in registration order.
pub struct HookRegistry {
    entries: RefCell<HashMap<PointKey, Vec<HandlerEntry>>>,
    next_seq: Cell<u64>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            next_seq: Cell::new(0),
        }
    }

    /// Register `handler` for extension point `P` under `scope`
    ///
    /// The handler's [`ScriptObject::validate`] runs first; a failing (or panicking)
    /// self-check refuses the registration and leaves the registry untouched.
    pub fn register<P: ExtensionPoint>(
        &self,
        scope: ScopeKey,
        handler: Rc<P::Handler>,
    ) -> Result<(), RegistrationError> {
        let script = handler.script_name().to_string();

        let validation = catch_unwind(AssertUnwindSafe(|| handler.validate()));
        let reason = match validation {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(format!("validation panicked: {}", panic_message(&*payload))),
        };
        if let Some(reason) = reason {
            warn!(target: "hooks", "Refusing {} for {} ({}): {}", script, P::NAME, scope, reason);
            return Err(RegistrationError::ValidationFailed {
                point: P::NAME,
                scope,
                script,
                reason,
            });
        }

        let addr = handler_addr(&handler);
        let mut entries = self.entries.borrow_mut();
        let list = entries.entry((TypeId::of::<P>(), scope)).or_default();

        if list.iter().any(|entry| entry.addr == addr) {
            return Err(RegistrationError::AlreadyRegistered {
                point: P::NAME,
                scope,
                script,
            });
        }

        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);

        debug!(target: "hooks", "Registered {} for {} ({})", script, P::NAME, scope);
        list.push(HandlerEntry {
            handler: Box::new(handler),
            addr,
            script,
            seq,
        });

        Ok(())
    }

    /// Remove `handler` from `P` under `scope`. Returns whether it was registered.
    pub fn unregister<P: ExtensionPoint>(&self, scope: ScopeKey, handler: &Rc<P::Handler>) -> bool {
        let addr = handler_addr(handler);
        let mut entries = self.entries.borrow_mut();
        let Some(list) = entries.get_mut(&(TypeId::of::<P>(), scope)) else {
            return false;
        };

        let before = list.len();
        list.retain(|entry| entry.addr != addr);
        let removed = list.len() < before;

        if removed {
            debug!(target: "hooks",
                "Unregistered {} from {} ({})",
                handler.script_name(),
                P::NAME,
                scope
            );
        }
        removed
    }

    /// Remove every handler registered by the script named `script`, across all points
    ///
    /// Returns the number of entries removed.
    pub fn unregister_script(&self, script: &str) -> usize {
        let mut entries = self.entries.borrow_mut();
        let mut count = 0;
        for list in entries.values_mut() {
            let before = list.len();
            list.retain(|entry| entry.script != script);
            count += before - list.len();
        }
        entries.retain(|_, list| !list.is_empty());

        if count > 0 {
            debug!(target: "hooks", "Unregistered {} hook(s) owned by {}", count, script);
        }
        count
    }

    /// Number of handlers registered for `P` under exactly `scope`
    pub fn handler_count<P: ExtensionPoint>(&self, scope: ScopeKey) -> usize {
        self.entries
            .borrow()
            .get(&(TypeId::of::<P>(), scope))
            .map_or(0, Vec::len)
    }

    /// Total number of registered handlers
    pub fn len(&self) -> usize {
        self.entries.borrow().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handlers that an invocation of `P` for `scope` would call, in call order
    fn snapshot<P: ExtensionPoint>(&self, scope: ScopeKey) -> Vec<Rc<P::Handler>> {
        let entries = self.entries.borrow();
        let type_id = TypeId::of::<P>();

        let mut groups = Vec::with_capacity(2);
        if !scope.is_global() {
            groups.push(scope);
        }
        groups.push(ScopeKey::Global);

        let mut handlers = Vec::new();
        for group in groups {
            let Some(list) = entries.get(&(type_id, group)) else {
                continue;
            };
            debug_assert!(list.windows(2).all(|w| w[0].seq < w[1].seq));
            handlers.extend(
                list.iter()
                    .filter_map(|entry| entry.handler.downcast_ref::<Rc<P::Handler>>())
                    .cloned(),
            );
        }
        handlers
    }

    /// Invoke every handler of `P` matching `scope`
    ///
    /// For [`HookKind::Filter`] points the walk stops at the first veto, which is
    /// returned. A filter handler that returns `Err` or panics counts as a veto.
    ///
    /// For [`HookKind::FireAndForget`] points every handler runs; faults are logged
    /// and do not affect the others. The result is always [`Verdict::Allow`].
    pub fn invoke<P, F>(&self, scope: ScopeKey, mut call: F) -> Verdict
    where
        P: ExtensionPoint,
        F: FnMut(&P::Handler) -> anyhow::Result<Verdict>,
    {
        let handlers = self.snapshot::<P>(scope);
        trace!(target: "hooks",
            "Invoking {} ({}) on {} handler(s)",
            P::NAME,
            scope,
            handlers.len()
        );

        for handler in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| call(&**handler)));

            let fault = match outcome {
                Ok(Ok(verdict)) => {
                    match (P::KIND, verdict) {
                        (HookKind::Filter, veto @ Verdict::Veto { .. }) => {
                            debug!(target: "hooks",
                                "{} ({}) vetoed by {}",
                                P::NAME,
                                scope,
                                handler.script_name()
                            );
                            return veto;
                        }
                        (HookKind::FireAndForget, Verdict::Veto { reason }) => {
                            trace!(target: "hooks",
                                "Ignoring veto from {} on fire-and-forget {}: {}",
                                handler.script_name(),
                                P::NAME,
                                reason
                            );
                        }
                        (_, Verdict::Allow) => {}
                    }
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("panicked: {}", panic_message(&*payload)),
            };

            error!(target: "hooks",
                "Handler {} failed on {} ({}): {}",
                handler.script_name(),
                P::NAME,
                scope,
                fault
            );

            if P::KIND.is_short_circuit() {
                return Verdict::veto(format!("handler {} faulted", handler.script_name()));
            }
        }

        Verdict::Allow
    }

    /// Fire-and-forget convenience over [`invoke`](Self::invoke)
    pub fn notify<P, F>(&self, scope: ScopeKey, mut call: F)
    where
        P: ExtensionPoint,
        F: FnMut(&P::Handler) -> anyhow::Result<()>,
    {
        self.invoke::<P, _>(scope, |handler| call(handler).map(|()| Verdict::Allow));
    }

    /// Filter convenience over [`invoke`](Self::invoke) for infallible checks
    pub fn check<P, F>(&self, scope: ScopeKey, mut call: F) -> Verdict
    where
        P: ExtensionPoint,
        F: FnMut(&P::Handler) -> Verdict,
    {
        self.invoke::<P, _>(scope, |handler| Ok(call(handler)))
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
