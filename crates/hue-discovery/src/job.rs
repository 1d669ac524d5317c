//! Cancellable asynchronous jobs.
//!
//! A [`CancellableJob`] owns one [`Task`], runs it on a tokio runtime and
//! reports completion exactly once. Cancellation is cooperative: the job
//! cancels the token handed to [`Task::execute`], and the task returns
//! whatever partial output it has gathered so far.

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A unit of asynchronous work driven by a [`CancellableJob`].
#[async_trait]
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    /// Runs the task to completion.
    ///
    /// Implementations must watch `cancel` and return promptly once it
    /// fires, yielding their partial output.
    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output;
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running,
    Cancelled,
    Completed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::NotStarted => write!(f, "NotStarted"),
            JobState::Running => write!(f, "Running"),
            JobState::Cancelled => write!(f, "Cancelled"),
            JobState::Completed => write!(f, "Completed"),
        }
    }
}

/// What a job hands to its completion callback
#[derive(Debug)]
pub struct JobOutcome<O> {
    /// Full output, or the partial output of a cancelled task
    pub output: O,
    /// True when the job was cancelled before the task finished
    pub cancelled: bool,
}

struct Progress {
    state: JobState,
    finished: bool,
}

struct JobShared {
    progress: Mutex<Progress>,
    finished: Condvar,
}

impl JobShared {
    fn finish(&self) {
        let mut progress = self.progress.lock();
        progress.finished = true;
        self.finished.notify_all();
    }
}

/// Wakes waiters even if the task or the completion callback panics.
struct FinishGuard(Arc<JobShared>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Runs a [`Task`] off the caller's thread with at-most-once cancellation.
pub struct CancellableJob<T: Task> {
    task: Mutex<Option<T>>,
    handle: Handle,
    token: CancellationToken,
    shared: Arc<JobShared>,
}

impl<T: Task> CancellableJob<T> {
    /// Creates a job that will spawn `task` on `handle`.
    pub fn new(task: T, handle: Handle) -> Self {
        Self {
            task: Mutex::new(Some(task)),
            handle,
            token: CancellationToken::new(),
            shared: Arc::new(JobShared {
                progress: Mutex::new(Progress {
                    state: JobState::NotStarted,
                    finished: false,
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// Starts the task and returns immediately.
    ///
    /// `on_done` fires exactly once, from a runtime thread. Returns false if
    /// the job was already started.
    pub fn run<F>(&self, on_done: F) -> bool
    where
        F: FnOnce(JobOutcome<T::Output>) + Send + 'static,
    {
        let Some(mut task) = self.task.lock().take() else {
            return false;
        };

        {
            let mut progress = self.shared.progress.lock();
            if progress.state != JobState::NotStarted {
                return false;
            }
            progress.state = JobState::Running;
        }

        let token = self.token.clone();
        let shared = Arc::clone(&self.shared);

        self.handle.spawn(async move {
            let guard = FinishGuard(Arc::clone(&shared));
            let output = task.execute(&token).await;

            let cancelled = {
                let mut progress = shared.progress.lock();
                if progress.state == JobState::Running && !token.is_cancelled() {
                    progress.state = JobState::Completed;
                    false
                } else {
                    progress.state = JobState::Cancelled;
                    true
                }
            };

            on_done(JobOutcome { output, cancelled });
            drop(task);
            drop(guard);
        });

        true
    }

    /// Requests cancellation.
    ///
    /// Returns true only if the job was running and this call moved it to
    /// [`JobState::Cancelled`]. Never causes a second completion callback.
    pub fn cancel(&self) -> bool {
        {
            let mut progress = self.shared.progress.lock();
            if progress.state != JobState::Running {
                return false;
            }
            progress.state = JobState::Cancelled;
        }

        debug!("Cancelling job");
        self.token.cancel();
        true
    }

    /// Blocks until the completion callback has returned.
    ///
    /// Returns immediately for a job that never started. Must not be called
    /// from a thread of the runtime the job runs on.
    pub fn wait(&self) {
        let mut progress = self.shared.progress.lock();
        while progress.state != JobState::NotStarted && !progress.finished {
            self.shared.finished.wait(&mut progress);
        }
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.shared.progress.lock().state
    }

    /// True while the task runs and has not been cancelled
    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    /// True once the completion callback has returned
    pub fn is_finished(&self) -> bool {
        self.shared.progress.lock().finished
    }
}
