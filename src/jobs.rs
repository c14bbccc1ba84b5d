// src/jobs.rs

//! Background job queue for fire-and-forget tasks
//!
//! Cache uploads run off-thread through this queue; `join_all` is the only
//! synchronization point with them and must run before process exit. The
//! queue is an explicit handle so tests can construct an independent
//! instance per case; `JobQueue::global()` is the process-wide one.
//!
//! Contract: `post` and `join_all` are mutually exclusive, `join_all` is not
//! reentrant, and task bodies may call neither. Violations are programming
//! errors and panic.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    handles: Vec<Option<JoinHandle<()>>>,
    descriptions: Vec<String>,
    completions: Vec<bool>,
    draining: bool,
}

/// Handle to a background job queue
#[derive(Clone, Default)]
pub struct JobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide queue; never torn down
    pub fn global() -> &'static JobQueue {
        static GLOBAL: OnceLock<JobQueue> = OnceLock::new();
        GLOBAL.get_or_init(JobQueue::new)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            // A panicking task only touched its completion slot; the state
            // is still consistent.
            poisoned.into_inner()
        })
    }

    /// Launch a fire-and-forget task
    ///
    /// Panics when called while `join_all` is draining the queue.
    pub fn post(&self, task: impl FnOnce() + Send + 'static, description: impl Into<String>) {
        let mut state = self.lock();
        assert!(
            !state.draining,
            "attempted to post a background job while draining"
        );

        let slot = state.handles.len();
        state.descriptions.push(description.into());
        state.completions.push(false);

        let queue = Arc::clone(&self.state);
        let handle = std::thread::spawn(move || {
            task();
            let mut state = queue.lock().unwrap_or_else(|p| p.into_inner());
            if !state.draining {
                state.completions[slot] = true;
            }
        });
        state.handles.push(Some(handle));
    }

    /// Block until every posted task has finished, then reset the queue
    ///
    /// Tasks are waited on in submission order; each wait prints a line to
    /// standard output, or to the debug channel when the task had already
    /// finished. Panics when called while a drain is already in progress.
    pub fn join_all(&self) {
        let task_count;
        {
            let mut state = self.lock();
            assert!(!state.draining, "attempted to drain the queue while draining");
            state.draining = true;
            task_count = state.handles.len();
        }

        for i in 0..task_count {
            let (handle, description, completed) = {
                let mut state = self.lock();
                (
                    state.handles[i].take(),
                    state.descriptions[i].clone(),
                    state.completions[i],
                )
            };
            if completed {
                debug!("Waiting for background task: {}", description);
            } else {
                println!("Waiting for background task: {}", description);
            }
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    tracing::warn!("background task panicked: {}", description);
                }
            }
        }

        let mut state = self.lock();
        state.handles.clear();
        state.descriptions.clear();
        state.completions.clear();
        state.draining = false;
    }

    /// Number of tasks currently tracked by the queue
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
