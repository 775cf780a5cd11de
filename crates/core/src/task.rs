//! Tasks: reusable units of asynchronous work with a cached result.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, trace};

use crate::completion::Completion;
use crate::id::TaskId;
use crate::result::{BatchResult, Payload};

/// Boxed producer: starts the work and eventually consumes the completion.
pub type Producer<S, F> = Box<dyn FnOnce(Completion<S, F>) + Send>;

/// Boxed resolution signal. Carries no payload.
pub type OnDone = Box<dyn FnOnce() + Send>;

/// A cached task result. Both sides are shared, so reading the result never
/// needs the payload types to be `Clone`.
pub type Outcome<S, F> = Result<Arc<S>, Arc<F>>;

enum Stage<S, F> {
    /// Producer not started yet.
    Idle(Producer<S, F>),
    /// Producer started; signals waiting for resolution.
    InFlight(Vec<OnDone>),
    /// Resolution happened. `None` when the completion was dropped unused.
    Resolved(Option<Outcome<S, F>>),
}

impl<S, F> Stage<S, F> {
    fn label(&self) -> &'static str {
        match self {
            Stage::Idle(_) => "idle",
            Stage::InFlight(_) => "in-flight",
            Stage::Resolved(Some(Ok(_))) => "succeeded",
            Stage::Resolved(Some(Err(_))) => "failed",
            Stage::Resolved(None) => "abandoned",
        }
    }
}

struct Shared<S, F> {
    id: TaskId,
    stage: Mutex<Stage<S, F>>,
}

impl<S, F> Shared<S, F> {
    /// First resolution wins; later ones are ignored.
    fn resolve(&self, outcome: Option<Result<S, F>>) {
        let waiters = {
            let mut stage = self.stage.lock();
            if matches!(*stage, Stage::Resolved(_)) {
                return;
            }
            let outcome = outcome.map(|result| result.map(Arc::new).map_err(Arc::new));
            match std::mem::replace(&mut *stage, Stage::Resolved(outcome)) {
                Stage::InFlight(waiters) => waiters,
                _ => Vec::new(),
            }
        };
        trace!(task = %self.id, waiters = waiters.len(), "task resolved");
        for on_done in waiters {
            on_done();
        }
    }
}

/// A unit of asynchronous work that produces exactly one result.
///
/// `Task` is a handle: clones share the producer and the cached result, and
/// two handles compare equal only when they refer to the same task.
///
/// The producer runs on the first [`Task::action`] call. Later calls never
/// run it again; they are signalled once the cached result is in place.
pub struct Task<S, F> {
    shared: Arc<Shared<S, F>>,
}

impl<S, F> Task<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    /// Create a task from a producer.
    pub fn new<P>(producer: P) -> Self
    where
        P: FnOnce(Completion<S, F>) + Send + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                id: TaskId::new(),
                stage: Mutex::new(Stage::Idle(Box::new(producer))),
            }),
        }
    }

    /// A task that resolves with `result` as soon as it is started.
    pub fn ready(result: Result<S, F>) -> Self {
        Self::new(move |completion| completion.complete(result))
    }

    /// A task whose producer runs `future` on a tokio runtime.
    pub fn spawn<Fut>(handle: &Handle, future: Fut) -> Self
    where
        Fut: Future<Output = Result<S, F>> + Send + 'static,
    {
        let handle = handle.clone();
        Self::new(move |completion| {
            handle.spawn(async move {
                completion.complete(future.await);
            });
        })
    }

    /// Start the task, or observe its resolution if already started.
    ///
    /// `on_done` runs exactly once, after the result has been cached. It may
    /// run on whatever thread delivers the result, or inline when the task
    /// has already resolved.
    ///
    /// A producer that panics is logged and the task resolves without a
    /// result; the panic does not reach the caller.
    pub fn action<D>(&self, on_done: D)
    where
        D: FnOnce() + Send + 'static,
    {
        let mut stage = self.shared.stage.lock();
        if let Stage::InFlight(waiters) = &mut *stage {
            waiters.push(Box::new(on_done));
            return;
        }
        if matches!(*stage, Stage::Resolved(_)) {
            drop(stage);
            on_done();
            return;
        }

        let previous = std::mem::replace(&mut *stage, Stage::InFlight(vec![Box::new(on_done)]));
        drop(stage);

        if let Stage::Idle(producer) = previous {
            trace!(task = %self.shared.id, "task started");
            let shared = Arc::clone(&self.shared);
            let completion = Completion::new(move |outcome| shared.resolve(outcome));
            if panic::catch_unwind(AssertUnwindSafe(|| producer(completion))).is_err() {
                error!(task = %self.shared.id, "task producer panicked");
                self.shared.resolve(None);
            }
        }
    }
}

impl<S, F> Task<S, F> {
    /// Identity of this task.
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    /// Whether the producer has delivered (or abandoned) its result.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.stage.lock(), Stage::Resolved(_))
    }

    /// The cached result. `None` until the task resolves.
    pub fn result(&self) -> Option<Outcome<S, F>> {
        match &*self.shared.stage.lock() {
            Stage::Resolved(outcome) => outcome.clone(),
            _ => None,
        }
    }
}

impl<S: Clone, F: Clone> Task<S, F> {
    /// A copy of the success value, if the task resolved successfully.
    pub fn value(&self) -> Option<S> {
        self.result()?.ok().map(|value| S::clone(&value))
    }

    /// A copy of the failure, if the task resolved with one.
    pub fn error(&self) -> Option<F> {
        self.result()?.err().map(|error| F::clone(&error))
    }
}

impl<S, F> Clone for Task<S, F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, F> PartialEq for Task<S, F> {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl<S, F> Eq for Task<S, F> {}

impl<S, F> std::hash::Hash for Task<S, F> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl<S, F> fmt::Debug for Task<S, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.shared.id)
            .field("stage", &self.shared.stage.lock().label())
            .finish()
    }
}

/// Contract for anything an operation can await.
///
/// Implementors must cache their result before signalling `on_done`.
/// A `None` result after resolution means the task never produced one.
pub trait TaskType {
    /// Success payload.
    type Success;
    /// Failure payload.
    type Failure;

    /// Identity of the task.
    fn id(&self) -> TaskId;

    /// Start the task; `on_done` fires once the result is cached.
    fn action(&self, on_done: OnDone);

    /// The cached result.
    fn result(&self) -> Option<Outcome<Self::Success, Self::Failure>>;

    /// The success value, if any.
    fn value(&self) -> Option<Arc<Self::Success>> {
        self.result()?.ok()
    }

    /// The failure, if any.
    fn error(&self) -> Option<Arc<Self::Failure>> {
        self.result()?.err()
    }
}

impl<S, F> TaskType for Task<S, F>
where
    S: Send + Sync + 'static,
    F: Send + Sync + 'static,
{
    type Success = S;
    type Failure = F;

    fn id(&self) -> TaskId {
        Task::id(self)
    }

    fn action(&self, on_done: OnDone) {
        Task::action(self, on_done)
    }

    fn result(&self) -> Option<Outcome<S, F>> {
        Task::result(self)
    }
}

/// Type-erased view of a task, so tasks of different types can share a batch.
pub trait ErasedTask {
    /// Identity of the task.
    fn task_id(&self) -> TaskId;

    /// Start the task; `on_done` fires once the result is cached.
    fn start(&self, on_done: OnDone);

    /// The cached result with both payloads wrapped in [`Payload`].
    fn outcome(&self) -> Option<BatchResult>;
}

impl<T> ErasedTask for T
where
    T: TaskType,
    T::Success: Send + Sync + 'static,
    T::Failure: Send + Sync + 'static,
{
    fn task_id(&self) -> TaskId {
        TaskType::id(self)
    }

    fn start(&self, on_done: OnDone) {
        TaskType::action(self, on_done)
    }

    fn outcome(&self) -> Option<BatchResult> {
        self.result()
            .map(|result| result.map(Payload::shared).map_err(Payload::shared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counted(result: Result<i32, String>) -> (Task<i32, String>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let task = Task::new(move |completion| {
            counter.fetch_add(1, Ordering::SeqCst);
            completion.complete(result);
        });
        (task, calls)
    }

    #[test]
    fn test_unstarted_task_reads_absent() {
        let (task, calls) = counted(Ok(1));
        assert_eq!(task.value(), None);
        assert_eq!(task.error(), None);
        assert_eq!(task.result(), None);
        assert!(!task.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_action_caches_success() {
        let (task, _) = counted(Ok(11));
        let (tx, rx) = unbounded();
        task.action(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(task.is_resolved());
        assert_eq!(task.value(), Some(11));
        assert_eq!(task.error(), None);
    }

    #[test]
    fn test_action_caches_failure() {
        let (task, _) = counted(Err("broken".to_string()));
        task.action(|| {});
        assert_eq!(task.value(), None);
        assert_eq!(task.error(), Some("broken".to_string()));
    }

    #[test]
    fn test_repeated_action_runs_producer_once() {
        let (task, calls) = counted(Ok(2));
        let signals = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let signals = Arc::clone(&signals);
            task.action(move || {
                signals.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signals.load(Ordering::SeqCst), 3);
        assert_eq!(task.value(), Some(2));
    }

    #[test]
    fn test_waiters_queue_while_in_flight() {
        let (hand_tx, hand_rx) = bounded::<Completion<i32, String>>(1);
        let task = Task::new(move |completion| hand_tx.send(completion).unwrap());
        let signals = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let signals = Arc::clone(&signals);
            task.action(move || {
                signals.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(signals.load(Ordering::SeqCst), 0);
        assert!(!task.is_resolved());

        hand_rx.recv().unwrap().succeed(9);
        assert_eq!(signals.load(Ordering::SeqCst), 2);
        assert_eq!(task.value(), Some(9));
    }

    #[test]
    fn test_dropped_completion_resolves_without_result() {
        let task: Task<i32, String> = Task::new(drop);
        let (tx, rx) = unbounded();
        task.action(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(task.is_resolved());
        assert_eq!(task.result(), None);
    }

    #[test]
    fn test_identity_equality() {
        let first: Task<i32, String> = Task::ready(Ok(1));
        let second: Task<i32, String> = Task::ready(Ok(1));
        assert_eq!(first, first.clone());
        assert_ne!(first, second);
        assert_eq!(first.id(), first.clone().id());
    }

    #[test]
    fn test_spawned_future_resolves() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap();
        let task: Task<i32, String> = Task::spawn(runtime.handle(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(7)
        });
        let (tx, rx) = unbounded();
        task.action(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(task.value(), Some(7));
    }

    #[test]
    fn test_erased_outcome_wraps_payloads() {
        let ok: Task<i32, String> = Task::ready(Ok(5));
        let failed: Task<f32, String> = Task::ready(Err("nope".to_string()));
        let erased: [&dyn ErasedTask; 2] = [&ok, &failed];

        assert!(erased[0].outcome().is_none());
        for task in erased {
            task.start(Box::new(|| {}));
        }

        let first = erased[0].outcome().unwrap().unwrap();
        assert_eq!(first.downcast::<i32>().unwrap(), 5);
        let second = erased[1].outcome().unwrap().unwrap_err();
        assert_eq!(second.downcast_ref::<String>().map(String::as_str), Some("nope"));
        assert_eq!(erased[1].task_id(), failed.id());
    }

    #[test]
    fn test_non_clone_failure_is_shared() {
        let task: Task<i32, anyhow::Error> = Task::ready(Err(anyhow::anyhow!("disk full")));
        task.action(|| {});

        let failure = TaskType::error(&task).unwrap();
        assert_eq!(failure.to_string(), "disk full");
        let again = task.result().unwrap().unwrap_err();
        assert!(Arc::ptr_eq(&failure, &again));

        let erased: &dyn ErasedTask = &task;
        let payload = erased.outcome().unwrap().unwrap_err();
        let shared = payload.downcast_arc::<anyhow::Error>().unwrap();
        assert!(Arc::ptr_eq(&shared, &failure));
    }

    #[test]
    fn test_panicking_producer_resolves_without_result() {
        let task: Task<i32, String> = Task::new(|_completion| panic!("producer failed"));
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signals);
        task.action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(task.is_resolved());
        assert_eq!(task.result(), None);
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_producer_keeps_delivered_result() {
        let task: Task<i32, String> = Task::new(|completion| {
            completion.succeed(4);
            panic!("after delivery");
        });
        task.action(|| {});
        assert_eq!(task.value(), Some(4));
    }
}
