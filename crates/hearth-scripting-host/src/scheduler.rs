use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::action::{
    new_slot, seal_if_ready, slot_is_set, take_slot, Action, ActionId, ActionResultSetter,
    ActionState, MultiActionResult,
};
use crate::panic_message;

/// Continuation run when an action is resumed
type Resume = Box<dyn FnOnce(&mut ActionScheduler) -> anyhow::Result<()>>;

/// When a tracked action counts as ready
enum Readiness {
    /// Scheduler clock reached this instant
    Deadline(Duration),
    /// External signal, e.g. a result setter or all children of a multi result
    Signal(Box<dyn Fn() -> bool>),
}

impl Readiness {
    fn is_ready(&self, now: Duration) -> bool {
        match self {
            Readiness::Deadline(at) => *at != Duration::MAX && now >= *at,
            Readiness::Signal(ready) => ready(),
        }
    }
}

/// An action owned by the scheduler
struct Tracked {
    id: ActionId,
    state: ActionState,
    readiness: Readiness,
    resume: Option<Resume>,
    /// Script that attached the continuation, for fault reports
    owner: Option<String>,
}

/// Result of one [`ActionScheduler::poll`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Continuations run this pass, including faulted ones
    pub resumed: usize,
    /// Continuations that returned an error or panicked
    pub faulted: usize,
    /// Actions still tracked after the pass
    pub pending: usize,
}

/// Tick-driven scheduler for script actions
///
/// Runs only on the simulation thread. Each [`poll`](Self::poll) advances the
/// scheduler clock, then walks the actions that existed when the pass started in
/// creation order: a pending action whose readiness holds becomes ready, and a
/// ready action with a continuation attached is resumed. Continuations get
/// `&mut ActionScheduler` and may create and chain new actions; those are first
/// looked at on the following poll.
pub struct ActionScheduler {
    actions: Vec<Tracked>,
    now: Duration,
    next_id: u64,
    polling: bool,
}

impl ActionScheduler {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
            now: Duration::ZERO,
            next_id: 0,
            polling: false,
        }
    }

    fn track(&mut self, readiness: Readiness) -> ActionId {
        let id = ActionId::from_raw(self.next_id);
        self.next_id += 1;

        self.actions.push(Tracked {
            id,
            state: ActionState::Pending,
            readiness,
            resume: None,
            owner: None,
        });
        id
    }

    /// Action that becomes ready once `duration` of scheduler time has passed
    ///
    /// Even a zero duration is only observed on the next poll, never at creation.
    /// A deadline past the clock's range saturates and never fires.
    pub fn create_wait(&mut self, duration: Duration) -> Action<()> {
        let id = self.track(Readiness::Deadline(self.now.saturating_add(duration)));
        trace!(target: "actions", "Created wait {} for {:?}", id, duration);
        Action {
            id,
            output: Box::new(|| Some(())),
        }
    }

    /// Action completed through the returned setter
    pub fn create_result<T: 'static>(&mut self) -> (Action<T>, ActionResultSetter<T>) {
        let slot = new_slot::<T>();

        let signal = Rc::clone(&slot);
        let id = self.track(Readiness::Signal(Box::new(move || slot_is_set(&signal))));
        trace!(target: "actions", "Created result {}", id);

        let output = Rc::clone(&slot);
        let action = Action {
            id,
            output: Box::new(move || take_slot(&output)),
        };
        (action, ActionResultSetter::new(id, slot))
    }

    /// Action that waits on every child minted from the returned handle
    pub fn create_multi_result<T: 'static>(&mut self) -> MultiActionResult<T> {
        let id = ActionId::from_raw(self.next_id);
        let multi = MultiActionResult::new(id);

        let state = multi.shared_state();
        let tracked = self.track(Readiness::Signal(Box::new(move || seal_if_ready(&state))));
        debug_assert_eq!(tracked, id);
        trace!(target: "actions", "Created multi result {}", id);

        multi
    }

    /// Attach the continuation that runs when `action` is resumed
    ///
    /// `owner` identifies the script in fault logs. The continuation receives
    /// the action's value: `()` for waits, `T` for results, `Vec<T>` for multi
    /// results.
    pub fn then<T, F>(&mut self, action: Action<T>, owner: impl Into<String>, continuation: F)
    where
        T: 'static,
        F: FnOnce(&mut ActionScheduler, T) -> anyhow::Result<()> + 'static,
    {
        let Action { id, output } = action;
        let owner = owner.into();

        let Some(tracked) = self.actions.iter_mut().find(|t| t.id == id) else {
            warn!(target: "actions",
                "{} tried to continue unknown or completed action {}",
                owner,
                id
            );
            return;
        };
        if tracked.resume.is_some() {
            warn!(target: "actions",
                "{} tried to attach a second continuation to action {}",
                owner,
                id
            );
            return;
        }

        let resume: Resume = Box::new(move |scheduler: &mut ActionScheduler| match output() {
            Some(value) => continuation(scheduler, value),
            None => Err(anyhow::anyhow!("action {} resumed without a result", id)),
        });
        tracked.resume = Some(resume);
        tracked.owner = Some(owner);
    }

    /// Advance the clock by `delta` and resume every action that is ready
    pub fn poll(&mut self, delta: Duration) -> PollReport {
        if self.polling {
            warn!(target: "actions", "Nested poll ignored");
            return PollReport {
                pending: self.actions.len(),
                ..PollReport::default()
            };
        }

        self.polling = true;
        self.now = self.now.saturating_add(delta);
        let now = self.now;
        let batch = self.actions.len();
        let mut report = PollReport::default();

        // Continuations only append, so indices below `batch` stay valid.
        for index in 0..batch {
            let tracked = &mut self.actions[index];
            if tracked.state == ActionState::Pending && tracked.readiness.is_ready(now) {
                tracked.state = ActionState::Ready;
                trace!(target: "actions", "Action {} ready", tracked.id);
            }

            if tracked.state != ActionState::Ready {
                continue;
            }
            let Some(resume) = tracked.resume.take() else {
                continue;
            };
            tracked.state = ActionState::Completed;
            let id = tracked.id;
            let owner = tracked.owner.take().unwrap_or_default();

            report.resumed += 1;
            let fault = match catch_unwind(AssertUnwindSafe(|| resume(self))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(payload) => format!("panicked: {}", panic_message(&*payload)),
            };

            report.faulted += 1;
            error!(target: "actions", "Script {} failed resuming action {}: {}", owner, id, fault);
        }

        self.actions
            .retain(|tracked| tracked.state != ActionState::Completed);
        self.polling = false;

        report.pending = self.actions.len();
        if report.resumed > 0 {
            debug!(target: "actions",
                "Poll resumed {} action(s), {} faulted, {} pending",
                report.resumed,
                report.faulted,
                report.pending
            );
        }
        report
    }

    /// State of a tracked action. `None` once it has completed and been dropped.
    pub fn state(&self, id: ActionId) -> Option<ActionState> {
        self.actions.iter().find(|t| t.id == id).map(|t| t.state)
    }

    /// Scheduler clock: total time advanced by `poll`
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of tracked actions that have not completed
    pub fn pending_count(&self) -> usize {
        self.actions.len()
    }

    pub fn is_idle(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn push(log: &Log, entry: impl Into<String>) {
        log.borrow_mut().push(entry.into());
    }

    #[test]
    fn test_wait_fires_at_deadline() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let wait = scheduler.create_wait(Duration::from_secs(2));
        let id = wait.id();
        let l = Rc::clone(&log);
        scheduler.then(wait, "test", move |_, ()| {
            push(&l, "fired");
            Ok(())
        });

        scheduler.poll(Duration::from_millis(1999));
        assert_eq!(scheduler.state(id), Some(ActionState::Pending));
        assert!(log.borrow().is_empty());

        let report = scheduler.poll(Duration::from_millis(1));
        assert_eq!(report.resumed, 1);
        assert_eq!(scheduler.state(id), None);
        assert_eq!(*log.borrow(), vec!["fired"]);
    }

    #[test]
    fn test_zero_wait_is_never_synchronous() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let wait = scheduler.create_wait(Duration::ZERO);
        let l = Rc::clone(&log);
        scheduler.then(wait, "test", move |_, ()| {
            push(&l, "zero");
            Ok(())
        });
        assert!(log.borrow().is_empty());
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.poll(Duration::ZERO);
        assert_eq!(*log.borrow(), vec!["zero"]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn test_result_ready_after_set() {
        let mut scheduler = ActionScheduler::new();
        let seen = Rc::new(RefCell::new(None));

        let (action, setter) = scheduler.create_result::<i32>();
        let id = action.id();
        let s = Rc::clone(&seen);
        scheduler.then(action, "test", move |_, value| {
            *s.borrow_mut() = Some(value);
            Ok(())
        });

        scheduler.poll(Duration::from_secs(10));
        assert_eq!(scheduler.state(id), Some(ActionState::Pending));

        setter.set_result(42).unwrap();
        assert_eq!(*seen.borrow(), None);

        scheduler.poll(Duration::ZERO);
        assert_eq!(*seen.borrow(), Some(42));
    }

    #[test]
    fn test_ready_without_continuation_waits_for_one() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let (action, setter) = scheduler.create_result::<&'static str>();
        let id = action.id();
        setter.set_result("late").unwrap();

        scheduler.poll(Duration::ZERO);
        assert_eq!(scheduler.state(id), Some(ActionState::Ready));

        let l = Rc::clone(&log);
        scheduler.then(action, "test", move |_, value| {
            push(&l, value);
            Ok(())
        });
        assert!(log.borrow().is_empty());

        scheduler.poll(Duration::ZERO);
        assert_eq!(*log.borrow(), vec!["late"]);
    }

    #[test]
    fn test_multi_result_waits_for_all_children() {
        let mut scheduler = ActionScheduler::new();
        let seen = Rc::new(RefCell::new(None));

        let multi = scheduler.create_multi_result::<u32>();
        let s = Rc::clone(&seen);
        scheduler.then(multi.action(), "test", move |_, values| {
            *s.borrow_mut() = Some(values);
            Ok(())
        });

        // No children yet: never vacuously ready
        scheduler.poll(Duration::from_secs(1));
        assert_eq!(scheduler.state(multi.id()), Some(ActionState::Pending));

        let first = multi.create_and_get_result();
        let second = multi.create_and_get_result();
        first.set_result(1).unwrap();
        scheduler.poll(Duration::ZERO);
        assert_eq!(*seen.borrow(), None);

        second.set_result(2).unwrap();
        scheduler.poll(Duration::ZERO);
        assert_eq!(*seen.borrow(), Some(vec![1, 2]));
    }

    #[test]
    fn test_wait_max_duration_never_fires() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        scheduler.poll(Duration::from_millis(1));
        let wait = scheduler.create_wait(Duration::MAX);
        let id = wait.id();
        let l = Rc::clone(&log);
        scheduler.then(wait, "forever", move |_, ()| {
            push(&l, "fired");
            Ok(())
        });

        scheduler.poll(Duration::from_secs(3600));
        scheduler.poll(Duration::MAX);
        assert_eq!(scheduler.now(), Duration::MAX);
        assert_eq!(scheduler.state(id), Some(ActionState::Pending));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_clock_saturates_and_still_fires_short_waits() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let wait = scheduler.create_wait(Duration::from_secs(5));
        let l = Rc::clone(&log);
        scheduler.then(wait, "short", move |_, ()| {
            push(&l, "short");
            Ok(())
        });

        scheduler.poll(Duration::MAX);
        scheduler.poll(Duration::from_millis(1));
        assert_eq!(scheduler.now(), Duration::MAX);
        assert_eq!(*log.borrow(), vec!["short"]);
    }

    #[test]
    #[cfg_attr(
        debug_assertions,
        should_panic(expected = "cannot add a child to multi result #0 after it became ready")
    )]
    fn test_multi_child_after_ready_poll_is_misuse() {
        let mut scheduler = ActionScheduler::new();
        let seen = Rc::new(RefCell::new(None));

        let multi = scheduler.create_multi_result::<u32>();
        multi.create_and_get_result().set_result(1).unwrap();
        scheduler.poll(Duration::ZERO);
        assert_eq!(scheduler.state(multi.id()), Some(ActionState::Ready));

        let late = multi.create_and_get_result();

        // Only reached in release builds: the late child is detached
        assert_eq!(multi.child_count(), 1);
        let s = Rc::clone(&seen);
        scheduler.then(multi.action(), "test", move |_, values| {
            *s.borrow_mut() = Some(values);
            Ok(())
        });
        let report = scheduler.poll(Duration::ZERO);
        assert_eq!(report.faulted, 0);
        assert_eq!(*seen.borrow(), Some(vec![1]));
        late.set_result(2).unwrap();
    }

    #[test]
    fn test_resume_in_creation_order() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        for (name, secs) in [("a", 3), ("b", 1), ("c", 2)] {
            let wait = scheduler.create_wait(Duration::from_secs(secs));
            let l = Rc::clone(&log);
            scheduler.then(wait, name, move |_, ()| {
                push(&l, name);
                Ok(())
            });
        }

        scheduler.poll(Duration::from_secs(5));
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_actions_created_during_poll_wait_for_next_poll() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let wait = scheduler.create_wait(Duration::ZERO);
        let l = Rc::clone(&log);
        scheduler.then(wait, "chain", move |scheduler, ()| {
            push(&l, "first");
            let next = scheduler.create_wait(Duration::ZERO);
            let l = Rc::clone(&l);
            scheduler.then(next, "chain", move |_, ()| {
                push(&l, "second");
                Ok(())
            });
            Ok(())
        });

        let report = scheduler.poll(Duration::ZERO);
        assert_eq!(report.resumed, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(*log.borrow(), vec!["first"]);

        scheduler.poll(Duration::ZERO);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_faulting_continuation_is_isolated() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let erring = scheduler.create_wait(Duration::ZERO);
        scheduler.then(erring, "erring_script", |_, ()| anyhow::bail!("bad state"));

        let panicking = scheduler.create_wait(Duration::ZERO);
        scheduler.then(panicking, "panicking_script", |_, ()| panic!("boom"));

        let healthy = scheduler.create_wait(Duration::ZERO);
        let l = Rc::clone(&log);
        scheduler.then(healthy, "healthy_script", move |_, ()| {
            push(&l, "healthy");
            Ok(())
        });

        let report = scheduler.poll(Duration::ZERO);
        assert_eq!(report.resumed, 3);
        assert_eq!(report.faulted, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(*log.borrow(), vec!["healthy"]);
    }

    #[test]
    fn test_setter_completes_later_action_in_same_pass() {
        let mut scheduler = ActionScheduler::new();
        let log = Log::default();

        let wait = scheduler.create_wait(Duration::ZERO);
        let (result, setter) = scheduler.create_result::<u8>();

        scheduler.then(wait, "producer", move |_, ()| {
            setter.set_result(9)?;
            Ok(())
        });
        let l = Rc::clone(&log);
        scheduler.then(result, "consumer", move |_, value| {
            push(&l, format!("got {}", value));
            Ok(())
        });

        scheduler.poll(Duration::ZERO);
        assert_eq!(*log.borrow(), vec!["got 9"]);
    }

    #[test]
    fn test_continue_unknown_action_is_ignored() {
        let mut other = ActionScheduler::new();
        let mut scheduler = ActionScheduler::new();

        // Ids from another scheduler do not exist here once this one has none
        let foreign = other.create_wait(Duration::ZERO);
        scheduler.then(foreign, "stray", |_, ()| Ok(()));

        assert!(scheduler.is_idle());
        assert_eq!(scheduler.poll(Duration::ZERO), PollReport::default());
    }
}
