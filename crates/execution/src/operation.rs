//! Operations: one sequential workflow bound to a dedicated worker.
//!
//! The worker is a named OS thread draining a FIFO queue of steps. Launch
//! queues three of them back to back:
//!
//! ```text
//! run workflow → barrier (Draining) → finish (Finished, unregister)
//! ```
//!
//! Every `await_*` call parks the worker on the operation's [`Gate`] until
//! the awaited callback raises it, so the workflow reads top to bottom while
//! the rest of the process keeps running.

use awaitkit_core::{
    AsyncError, BatchResult, Completion, ErasedTask, JoinGroup, OperationId, Outcome, Payload,
    Task, TaskType, Time,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, error, warn};

use crate::dispatcher::DispatcherConfig;
use crate::gate::Gate;
use crate::main_context::MainHandle;
use crate::registry::Registry;

/// The workflow body run on an operation's worker.
pub type Workflow = Box<dyn FnOnce(&Operation) + Send>;

/// A teardown hook run on an operation's worker.
pub type Hook = Box<dyn FnOnce(&Operation) + Send>;

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Constructed and registered; workflow not started
    Created,
    /// Workflow body executing
    Running,
    /// Workflow returned; barrier step executing
    Draining,
    /// Finisher ran; no longer registered
    Finished,
}

impl OperationState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OperationState::Created,
            1 => OperationState::Running,
            2 => OperationState::Draining,
            _ => OperationState::Finished,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Created => write!(f, "created"),
            OperationState::Running => write!(f, "running"),
            OperationState::Draining => write!(f, "draining"),
            OperationState::Finished => write!(f, "finished"),
        }
    }
}

/// Teardown hooks for a launched operation.
///
/// The barrier hook runs once the workflow has returned; the finish hook
/// runs right before the operation leaves the registry.
#[derive(Default)]
pub struct LaunchOptions {
    barrier: Option<Hook>,
    finish: Option<Hook>,
}

impl LaunchOptions {
    /// Options with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` during the barrier step.
    pub fn on_barrier<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&Operation) + Send + 'static,
    {
        self.barrier = Some(Box::new(hook));
        self
    }

    /// Run `hook` during the finish step.
    pub fn on_finish<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&Operation) + Send + 'static,
    {
        self.finish = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for LaunchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchOptions")
            .field("barrier", &self.barrier.is_some())
            .field("finish", &self.finish.is_some())
            .finish()
    }
}

enum Step {
    Run(Workflow),
    Barrier(Option<Hook>),
    Finish {
        registry: Arc<Registry>,
        hook: Option<Hook>,
    },
}

/// One sequential workflow execution.
///
/// The registry owns the operation while it runs; the worker only holds a
/// weak reference.
///
/// Methods named `await_*` and [`Operation::main`] block the calling thread
/// and must only be called from the workflow body, on the worker. All of
/// them share one gate, so a second thread awaiting on the same operation
/// would take the worker's signals. Debug builds assert this.
pub struct Operation {
    id: OperationId,
    name: String,
    created_at: Time,
    state: AtomicU8,
    worker: OnceLock<ThreadId>,
    gate: Arc<Gate>,
    steps: Sender<Step>,
    main: MainHandle,
}

impl Operation {
    /// Register a new operation, start its worker and queue its lifecycle.
    pub(crate) fn spawn(
        config: &DispatcherConfig,
        registry: &Arc<Registry>,
        main: MainHandle,
        options: LaunchOptions,
        workflow: Workflow,
    ) -> Result<Arc<Self>, AsyncError> {
        let id = OperationId::new();
        let name = format!("{}.{}", config.namespace, id);
        let (steps, queue) = crossbeam_channel::unbounded();

        let operation = Arc::new(Self {
            id,
            name: name.clone(),
            created_at: chrono::Utc::now(),
            state: AtomicU8::new(OperationState::Created as u8),
            worker: OnceLock::new(),
            gate: Arc::new(Gate::new()),
            steps,
            main,
        });
        registry.insert(name.clone(), Arc::clone(&operation));

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = config.worker_stack_size {
            builder = builder.stack_size(size);
        }
        let worker = Arc::downgrade(&operation);
        match builder.spawn(move || run_worker(worker, queue)) {
            Ok(handle) => {
                let _ = operation.worker.set(handle.thread().id());
            }
            Err(err) => {
                registry.remove(&name);
                return Err(AsyncError::WorkerSpawn {
                    name,
                    reason: err.to_string(),
                });
            }
        }
        debug!(operation = %name, "operation created");

        let LaunchOptions { barrier, finish } = options;
        operation.enqueue(Step::Run(workflow));
        operation.enqueue(Step::Barrier(barrier));
        operation.enqueue(Step::Finish {
            registry: Arc::clone(registry),
            hook: finish,
        });

        Ok(operation)
    }

    /// Unique id.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Registry key, `<namespace>.<id>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the operation was constructed.
    pub fn created_at(&self) -> Time {
        self.created_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: OperationState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn assert_on_worker(&self) {
        debug_assert_eq!(
            self.worker.get().copied(),
            Some(thread::current().id()),
            "operation {} awaited off its worker thread",
            self.name
        );
    }

    fn enqueue(&self, step: Step) {
        if self.steps.send(step).is_err() {
            warn!(operation = %self.name, "worker gone; step dropped");
        }
    }

    /// Wait for a callback-style producer to deliver its result.
    ///
    /// `producer` runs on the calling thread and must eventually consume
    /// the completion, from any thread. If the completion is dropped unused
    /// the call returns [`AsyncError::MissingResult`] converted into `E`.
    /// If it is never consumed nor dropped, the call never returns.
    pub fn await_result<T, E, P>(&self, producer: P) -> Result<T, E>
    where
        P: FnOnce(Completion<T, E>),
        T: Send + 'static,
        E: From<AsyncError> + Send + 'static,
    {
        self.assert_on_worker();
        let slot: Arc<Mutex<Option<Result<T, E>>>> = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let gate = Arc::clone(&self.gate);
        producer(Completion::new(move |outcome| {
            *sink.lock() = outcome;
            gate.signal();
        }));
        self.gate.wait();

        let outcome = slot.lock().take();
        outcome.unwrap_or_else(|| Err(AsyncError::MissingResult.into()))
    }

    /// Untyped variant of [`Operation::await_result`].
    pub fn await_payload<P>(&self, producer: P) -> Result<Payload, AsyncError>
    where
        P: FnOnce(Completion<Payload, AsyncError>),
    {
        self.await_result(producer)
    }

    /// Start `task` (or join it if already started) and wait for it.
    ///
    /// Returns the task's cached result, `None` if it resolved without one.
    /// The same result stays readable through the task afterwards.
    pub fn await_task<T: TaskType>(&self, task: &T) -> Option<Outcome<T::Success, T::Failure>> {
        self.assert_on_worker();
        let gate = Arc::clone(&self.gate);
        task.action(Box::new(move || gate.signal()));
        self.gate.wait();
        task.result()
    }

    /// Start every task at once and wait until all of them resolved.
    ///
    /// Entry `i` always belongs to `tasks[i]`, whatever order they finish
    /// in. A failing task does not affect its siblings. A task that ends
    /// without a result gets [`AsyncError::Unresolved`] as its failure.
    pub fn await_all(&self, tasks: &[&dyn ErasedTask]) -> Vec<BatchResult> {
        debug!(operation = %self.name, tasks = tasks.len(), "awaiting batch");
        let joined: Result<(), AsyncError> = self.await_result(|completion| {
            let group = Arc::new(JoinGroup::new(move || completion.succeed(())));
            for task in tasks {
                group.enter();
                let member = Arc::clone(&group);
                task.start(Box::new(move || member.leave()));
            }
            group.leave();
        });
        if let Err(err) = joined {
            warn!(operation = %self.name, error = %err, "batch join ended without a result");
        }

        tasks
            .iter()
            .map(|task| {
                task.outcome().unwrap_or_else(|| {
                    Err(Payload::new(AsyncError::Unresolved(task.task_id())))
                })
            })
            .collect()
    }

    /// Run `closure` on the main context and wait for it to finish.
    ///
    /// Returns `false` when the main context is closed or the closure
    /// panicked.
    pub fn main<C>(&self, closure: C) -> bool
    where
        C: FnOnce() + Send + 'static,
    {
        let main = self.main.clone();
        let hop = Task::<bool, AsyncError>::new(move |completion| {
            let dispatched = main.dispatch(move || {
                closure();
                completion.succeed(true);
            });
            if let Err(err) = dispatched {
                warn!(error = %err, "main context hop rejected");
            }
        });
        matches!(self.await_task(&hop), Some(Ok(hopped)) if *hopped)
    }
}

fn run_worker(operation: Weak<Operation>, queue: Receiver<Step>) {
    for step in queue.iter() {
        let Some(strong) = operation.upgrade() else {
            break;
        };
        let current: &Operation = &strong;

        match step {
            Step::Run(workflow) => {
                current.set_state(OperationState::Running);
                debug!(operation = %current.name, "workflow started");
                if panic::catch_unwind(AssertUnwindSafe(|| workflow(current))).is_err() {
                    error!(operation = %current.name, "workflow panicked");
                }
            }
            Step::Barrier(hook) => {
                current.set_state(OperationState::Draining);
                run_hook(current, hook, "barrier");
            }
            Step::Finish { registry, hook } => {
                run_hook(current, hook, "finish");
                current.set_state(OperationState::Finished);
                registry.remove(&current.name);
                let elapsed = chrono::Utc::now() - current.created_at;
                debug!(
                    operation = %current.name,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "operation finished"
                );
                break;
            }
        }
    }
}

fn run_hook(operation: &Operation, hook: Option<Hook>, step: &'static str) {
    let Some(hook) = hook else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| hook(operation))).is_err() {
        error!(operation = %operation.name, step, "hook panicked");
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Operation {
    fn drop(&mut self) {
        debug!(operation = %self.name, "operation released");
    }
}
