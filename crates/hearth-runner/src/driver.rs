use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use hearth_scripting_host::{
    panic_message, ActionResultSetter, ActionScheduler, HookRegistry, PollReport, WorkQueue,
};

use crate::config::RunnerConfig;

/// Identifies a result that a producer thread will complete through the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken(u64);

/// Access to the simulation-thread state for work items
pub struct TickContext<'a> {
    pub registry: &'a Rc<HookRegistry>,
    pub scheduler: &'a mut ActionScheduler,
    completions: &'a mut Completions,
}

impl TickContext<'_> {
    /// See [`TickDriver::remote_setter`]
    pub fn remote_setter<T: Send + 'static>(
        &mut self,
        setter: ActionResultSetter<T>,
    ) -> RemoteSetter<T> {
        self.completions.register(setter)
    }
}

/// Unit of work handed from any thread to the tick loop
pub enum WorkItem {
    /// Complete the action behind `token` with `value`
    Complete {
        token: CompletionToken,
        value: Box<dyn Any + Send>,
    },
    /// The remote setter behind `token` was dropped without a value
    Cancel { token: CompletionToken },
    /// Run a closure on the simulation thread
    Task(Box<dyn FnOnce(&mut TickContext<'_>) + Send>),
}

impl WorkItem {
    pub fn task(f: impl FnOnce(&mut TickContext<'_>) + Send + 'static) -> Self {
        WorkItem::Task(Box::new(f))
    }
}

/// `Send` stand-in for an [`ActionResultSetter`] living on the tick thread
///
/// Completing it pushes a [`WorkItem::Complete`]; the real setter runs when the
/// tick loop next drains the queue. Dropping it uncompleted pushes a
/// [`WorkItem::Cancel`] so the tick loop forgets the setter.
pub struct RemoteSetter<T> {
    token: CompletionToken,
    queue: Arc<WorkQueue<WorkItem>>,
    completed: bool,
    _value: PhantomData<fn(T)>,
}

impl<T: Send + 'static> RemoteSetter<T> {
    pub fn token(&self) -> CompletionToken {
        self.token
    }

    /// Returns false if the queue has shut down and the value was dropped
    pub fn complete(mut self, value: T) -> bool {
        self.completed = true;
        self.queue.push(WorkItem::Complete {
            token: self.token,
            value: Box::new(value),
        })
    }
}

impl<T> Drop for RemoteSetter<T> {
    fn drop(&mut self) {
        if !self.completed {
            // After shutdown the tick loop has already cleared its table
            self.queue.push(WorkItem::Cancel { token: self.token });
        }
    }
}

type Completion = Box<dyn FnOnce(Box<dyn Any + Send>) -> anyhow::Result<()>>;

/// Setters waiting for a value from another thread
struct Completions {
    pending: HashMap<CompletionToken, Completion>,
    next_token: u64,
    queue: Arc<WorkQueue<WorkItem>>,
}

impl Completions {
    fn register<T: Send + 'static>(&mut self, setter: ActionResultSetter<T>) -> RemoteSetter<T> {
        let token = CompletionToken(self.next_token);
        self.next_token += 1;

        let completion: Completion = Box::new(move |value: Box<dyn Any + Send>| {
            let value = value.downcast::<T>().map_err(|_| {
                anyhow::anyhow!(
                    "completion for action {} carried the wrong type",
                    setter.action_id()
                )
            })?;
            setter.set_result(*value)?;
            Ok(())
        });
        self.pending.insert(token, completion);

        RemoteSetter {
            token,
            queue: Arc::clone(&self.queue),
            completed: false,
            _value: PhantomData,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Work items taken from the queue this tick
    pub work_items: usize,
    pub poll: PollReport,
}

/// Owns the script core for one simulation and drives it once per tick
///
/// Each tick first applies queued work from other threads, then polls the
/// action scheduler. Hook invocations made by applied work or resumed actions
/// therefore always see this tick's external input.
pub struct TickDriver {
    registry: Rc<HookRegistry>,
    scheduler: ActionScheduler,
    queue: Arc<WorkQueue<WorkItem>>,
    completions: Completions,
    max_items_per_tick: usize,
    ticks: u64,
}

impl TickDriver {
    pub fn new(config: &RunnerConfig) -> Self {
        let queue = Arc::new(WorkQueue::new());
        Self {
            registry: Rc::new(HookRegistry::new()),
            scheduler: ActionScheduler::new(),
            completions: Completions {
                pending: HashMap::new(),
                next_token: 0,
                queue: Arc::clone(&queue),
            },
            queue,
            max_items_per_tick: config.max_work_items_per_tick,
            ticks: 0,
        }
    }

    pub fn registry(&self) -> &Rc<HookRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &ActionScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut ActionScheduler {
        &mut self.scheduler
    }

    /// Producer-side handle to the work queue
    pub fn queue(&self) -> Arc<WorkQueue<WorkItem>> {
        Arc::clone(&self.queue)
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Number of remote setters not yet completed
    pub fn outstanding_completions(&self) -> usize {
        self.completions.pending.len()
    }

    /// Wrap `setter` so another thread can complete it through the work queue
    pub fn remote_setter<T: Send + 'static>(
        &mut self,
        setter: ActionResultSetter<T>,
    ) -> RemoteSetter<T> {
        self.completions.register(setter)
    }

    fn apply(&mut self, item: WorkItem) {
        match item {
            WorkItem::Complete { token, value } => {
                let Some(completion) = self.completions.pending.remove(&token) else {
                    warn!(target: "runner", "Completion for unknown token {:?}", token);
                    return;
                };
                if let Err(e) = completion(value) {
                    error!(target: "runner", "Failed to apply completion {:?}: {:#}", token, e);
                }
            }
            WorkItem::Cancel { token } => {
                if self.completions.pending.remove(&token).is_some() {
                    warn!(target: "runner",
                        "Remote setter {:?} dropped without a value, its action stays pending",
                        token
                    );
                }
            }
            WorkItem::Task(task) => {
                let mut ctx = TickContext {
                    registry: &self.registry,
                    scheduler: &mut self.scheduler,
                    completions: &mut self.completions,
                };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task(&mut ctx))) {
                    error!(target: "runner",
                        "Work item panicked on tick {}: {}",
                        self.ticks,
                        panic_message(&*payload)
                    );
                }
            }
        }
    }

    /// Run one simulation tick of length `delta`
    pub fn tick(&mut self, delta: Duration) -> TickReport {
        self.ticks += 1;

        let items = if self.max_items_per_tick == 0 {
            self.queue.drain()
        } else {
            std::iter::from_fn(|| self.queue.try_pop())
                .take(self.max_items_per_tick)
                .collect()
        };
        let work_items = items.len();
        for item in items {
            self.apply(item);
        }

        let poll = self.scheduler.poll(delta);
        trace!(target: "runner",
            "Tick {}: {} work item(s), {} resumed, {} pending",
            self.ticks,
            work_items,
            poll.resumed,
            poll.pending
        );

        TickReport {
            tick: self.ticks,
            work_items,
            poll,
        }
    }

    /// Tick every `config.tick_interval()` until `shutdown` resolves, then shut
    /// the queue down
    ///
    /// Each tick is passed the real time elapsed since the previous one. Returns
    /// the number of ticks run.
    pub async fn run(
        &mut self,
        config: &RunnerConfig,
        shutdown: impl Future<Output = ()>,
    ) -> u64 {
        let tick_interval = config.tick_interval();
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(target: "runner", "Tick loop started ({:?} per tick)", tick_interval);
        let started_at = self.ticks;
        let mut last_tick = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                now = interval.tick() => {
                    let delta = now.duration_since(last_tick);
                    last_tick = now;
                    self.tick(delta);
                }
            }
        }

        self.shutdown();
        let ran = self.ticks - started_at;
        info!(target: "runner", "Tick loop stopped after {} tick(s)", ran);
        ran
    }

    /// Shut the work queue down
    ///
    /// Pending items and outstanding remote setters are discarded.
    pub fn shutdown(&mut self) {
        if !self.queue.is_shutdown() {
            debug!(target: "runner",
                "Shutting down work queue ({} outstanding completion(s))",
                self.completions.pending.len()
            );
            self.queue.shutdown();
        }
        self.completions.pending.clear();
    }
}
