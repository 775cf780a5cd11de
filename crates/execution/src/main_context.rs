//! The main context: a FIFO executor reserved for primary-thread work.

use awaitkit_core::AsyncError;
use crossbeam_channel::{Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send>;

/// Sending side of the main context. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MainHandle {
    jobs: Sender<Job>,
}

impl MainHandle {
    /// Queue a closure on the main context.
    pub fn dispatch<J>(&self, job: J) -> Result<(), AsyncError>
    where
        J: FnOnce() + Send + 'static,
    {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| AsyncError::MainContextClosed)
    }
}

/// Executing side of the main context.
///
/// Whoever owns the loop decides which thread is "main": either call
/// [`MainLoop::run`] / [`MainLoop::run_pending`] on the primary thread, or
/// let [`spawn`] dedicate a thread to it.
#[derive(Debug)]
pub struct MainLoop {
    jobs: Receiver<Job>,
}

impl MainLoop {
    /// Run closures in arrival order until every handle is dropped.
    pub fn run(self) {
        for job in self.jobs.iter() {
            execute(job);
        }
        debug!("main context drained");
    }

    /// Run whatever is queued right now. Returns how many closures ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        for job in self.jobs.try_iter() {
            execute(job);
            ran += 1;
        }
        ran
    }
}

fn execute(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("main context closure panicked");
    }
}

/// Create a main context whose loop the caller drives.
pub fn channel() -> (MainHandle, MainLoop) {
    let (jobs, queue) = crossbeam_channel::unbounded();
    (MainHandle { jobs }, MainLoop { jobs: queue })
}

/// Create a main context running on its own named thread.
pub fn spawn(name: &str) -> Result<MainHandle, AsyncError> {
    let (handle, main_loop) = channel();
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || main_loop.run())
        .map_err(|err| AsyncError::WorkerSpawn {
            name: name.to_string(),
            reason: err.to_string(),
        })?;
    debug!(thread = name, "main context started");
    Ok(handle)
}
