//! Action handles, result setters and multi results.
//!
//! An action is a single-threaded cooperative future: the [`ActionScheduler`]
//! polls its readiness once per tick and runs the attached continuation when it
//! becomes ready. Handles here are the script-facing half; the tracking state
//! lives in the scheduler.
//!
//! [`ActionScheduler`]: crate::ActionScheduler

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::error;

use crate::error::ActionError;

/// Identifier of an action, unique per scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of an action. Transitions only ever go forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Readiness not yet observed
    Pending,
    /// Readiness observed; waiting for its continuation to run
    Ready,
    /// Continuation has run. Terminal.
    Completed,
}

/// Value cell shared between a setter and the action it completes
pub(crate) struct ResultSlot<T> {
    value: Option<T>,
    set: bool,
}

pub(crate) type SharedSlot<T> = Rc<RefCell<ResultSlot<T>>>;

pub(crate) fn new_slot<T>() -> SharedSlot<T> {
    Rc::new(RefCell::new(ResultSlot {
        value: None,
        set: false,
    }))
}

pub(crate) fn slot_is_set<T>(slot: &SharedSlot<T>) -> bool {
    slot.borrow().set
}

pub(crate) fn take_slot<T>(slot: &SharedSlot<T>) -> Option<T> {
    slot.borrow_mut().value.take()
}

/// Script-facing handle to a pending action
///
/// Hand it to [`ActionScheduler::then`](crate::ActionScheduler::then) to attach
/// the continuation that runs once it is ready.
pub struct Action<T> {
    pub(crate) id: ActionId,
    pub(crate) output: Box<dyn FnOnce() -> Option<T>>,
}

impl<T> Action<T> {
    pub fn id(&self) -> ActionId {
        self.id
    }
}

impl<T> fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("id", &self.id).finish()
    }
}

/// The single-use capability that supplies an action's result
///
/// Clones share the same slot; whichever clone sets first wins and every later
/// call is a logic error in the calling script.
pub struct ActionResultSetter<T> {
    id: ActionId,
    slot: SharedSlot<T>,
}

impl<T> ActionResultSetter<T> {
    pub(crate) fn new(id: ActionId, slot: SharedSlot<T>) -> Self {
        Self { id, slot }
    }

    /// The action this setter completes
    pub fn action_id(&self) -> ActionId {
        self.id
    }

    /// Supply the result. The action becomes ready on the next poll.
    ///
    /// Setting twice asserts in debug builds and returns
    /// [`ActionError::AlreadyCompleted`] otherwise; the first value is kept.
    pub fn set_result(&self, value: T) -> Result<(), ActionError> {
        let mut slot = self.slot.borrow_mut();
        if slot.set {
            drop(slot);
            error!(target: "actions", "Result set twice for action {}", self.id);
            debug_assert!(false, "result already set for action {}", self.id);
            return Err(ActionError::AlreadyCompleted { action: self.id });
        }

        slot.value = Some(value);
        slot.set = true;
        Ok(())
    }

    /// Whether a result has been supplied
    pub fn is_set(&self) -> bool {
        slot_is_set(&self.slot)
    }
}

impl<T> Clone for ActionResultSetter<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for ActionResultSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionResultSetter")
            .field("id", &self.id)
            .field("set", &self.is_set())
            .finish()
    }
}

pub(crate) struct MultiState<T> {
    children: Vec<SharedSlot<T>>,
    /// Set once the scheduler has seen the multi result ready. No children after that.
    sealed: bool,
}

pub(crate) type SharedMulti<T> = Rc<RefCell<MultiState<T>>>;

/// Ready when every child is set. No children means not ready.
pub(crate) fn multi_is_ready<T>(state: &SharedMulti<T>) -> bool {
    let state = state.borrow();
    !state.children.is_empty() && state.children.iter().all(slot_is_set)
}

/// Readiness check used by the scheduler. A ready multi result is sealed.
pub(crate) fn seal_if_ready<T>(state: &SharedMulti<T>) -> bool {
    let ready = multi_is_ready(state);
    if ready {
        state.borrow_mut().sealed = true;
    }
    ready
}

/// An action whose readiness is the AND of a growing set of child results
///
/// Children may be added until a poll has seen the action ready. The
/// continuation receives the child values in creation order.
pub struct MultiActionResult<T> {
    id: ActionId,
    state: SharedMulti<T>,
}

impl<T: 'static> MultiActionResult<T> {
    pub(crate) fn new(id: ActionId) -> Self {
        Self {
            id,
            state: Rc::new(RefCell::new(MultiState {
                children: Vec::new(),
                sealed: false,
            })),
        }
    }

    pub(crate) fn shared_state(&self) -> SharedMulti<T> {
        Rc::clone(&self.state)
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    /// Mint a new child result and return its setter
    ///
    /// Adding a child once a poll has seen the multi result ready asserts in
    /// debug builds; in release the returned setter is detached and has no effect.
    pub fn create_and_get_result(&self) -> ActionResultSetter<T> {
        let slot = new_slot();
        let mut state = self.state.borrow_mut();
        if state.sealed {
            drop(state);
            let err = ActionError::ChildAfterReady { action: self.id };
            error!(target: "actions", "{}", err);
            debug_assert!(false, "{}", err);
            return ActionResultSetter::new(self.id, slot);
        }

        state.children.push(Rc::clone(&slot));
        ActionResultSetter::new(self.id, slot)
    }

    pub fn child_count(&self) -> usize {
        self.state.borrow().children.len()
    }

    /// Snapshot readiness: non-empty and every child set
    pub fn is_ready(&self) -> bool {
        multi_is_ready(&self.state)
    }

    /// Handle used to attach the continuation
    pub fn action(&self) -> Action<Vec<T>> {
        let state = Rc::clone(&self.state);
        Action {
            id: self.id,
            output: Box::new(move || {
                let mut state = state.borrow_mut();
                state.sealed = true;
                let values: Option<Vec<T>> = state.children.iter().map(take_slot).collect();
                values
            }),
        }
    }
}

impl<T> fmt::Debug for MultiActionResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiActionResult")
            .field("id", &self.id)
            .field("children", &self.state.borrow().children.len())
            .finish()
    }
}
