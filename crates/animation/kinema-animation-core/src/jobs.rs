//! Job execution: a thread-pool-backed future/handle pair.
//!
//! `Begin` submits one character's prepared frame as an independent unit
//! of work and keeps the returned handle; `Wait` blocks on it (condvar,
//! never a spin loop); `Synchronize` runs once afterwards. Characters
//! share no mutable state, so the pool needs no cross-job locking. The
//! inline mode is an explicit configuration switch used by tools and
//! debug contexts.

use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug)]
struct JobState {
    done: Mutex<bool>,
    cv: Condvar,
}

/// Completion handle for one submitted job.
#[derive(Clone, Debug)]
pub struct JobHandle(Arc<JobState>);

impl JobHandle {
    fn new(done: bool) -> Self {
        Self(Arc::new(JobState {
            done: Mutex::new(done),
            cv: Condvar::new(),
        }))
    }

    /// A handle that is already resolved; used as the initial consumer
    /// fence before any frame has run.
    pub fn completed() -> Self {
        Self::new(true)
    }

    fn mark_done(&self) {
        let mut done = self.0.done.lock().expect("job state poisoned");
        *done = true;
        self.0.cv.notify_all();
    }

    /// Block until the job has run to completion.
    pub fn wait(&self) {
        let mut done = self.0.done.lock().expect("job state poisoned");
        while !*done {
            done = self.0.cv.wait(done).expect("job state poisoned");
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        *self.0.done.lock().expect("job state poisoned")
    }
}

/// Owns the worker pool. Submitted jobs always run to completion; there is
/// no cancellation at this layer.
pub struct JobExecutor {
    pool: Option<rayon::ThreadPool>,
}

impl JobExecutor {
    /// `worker_threads` 0 picks the rayon default; `inline` disables the
    /// pool entirely so every spawn runs on the calling thread.
    pub fn new(worker_threads: usize, inline: bool) -> Self {
        let pool = if inline {
            None
        } else {
            rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .thread_name(|i| format!("kinema-anim-{i}"))
                .build()
                .map_err(|e| {
                    log::error!("worker pool unavailable ({e}), falling back to inline execution");
                    e
                })
                .ok()
        };
        Self { pool }
    }

    #[inline]
    pub fn is_inline(&self) -> bool {
        self.pool.is_none()
    }

    /// Run `job` on a worker (or inline) and return its completion handle.
    pub fn spawn<F>(&self, job: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.pool {
            Some(pool) => {
                let handle = JobHandle::new(false);
                let signal = handle.clone();
                pool.spawn(move || {
                    job();
                    signal.mark_done();
                });
                handle
            }
            None => {
                job();
                JobHandle::completed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn wait_joins_the_job() {
        let executor = JobExecutor::new(2, false);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let handle = executor.spawn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        handle.wait();
        assert!(handle.is_done());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn inline_mode_runs_on_caller() {
        let executor = JobExecutor::new(0, true);
        assert!(executor.is_inline());
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let handle = executor.spawn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        // inline spawn resolves before returning
        assert!(handle.is_done());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
