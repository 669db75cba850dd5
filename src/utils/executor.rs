// src/utils/executor.rs

//! Pluggable execution policy for independent units of work.
//!
//! The explainer has exactly two fan-out points: one model evaluation per
//! batch of coalitions, and one regression per model output. Both go through
//! [`Executor::try_map`], which runs every task and joins them all before
//! returning. Results come back in index order regardless of completion
//! order; the first failing task fails the whole batch.

use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;

use crate::core::Result;

/// Where independent tasks run.
#[derive(Clone, Default)]
pub enum Executor {
    /// Run tasks one after another on the calling thread.
    #[default]
    Sequential,
    /// Run tasks on rayon's global thread pool.
    Global,
    /// Run tasks on a caller-owned rayon pool.
    Pool(Arc<rayon::ThreadPool>),
}

impl Executor {
    /// Wraps an existing pool.
    pub fn pool(pool: Arc<rayon::ThreadPool>) -> Self {
        Executor::Pool(pool)
    }

    /// Runs `task(i)` for every `i in 0..n` and waits for all of them.
    pub fn try_map<T, F>(&self, n: usize, task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> Result<T> + Sync + Send,
    {
        match self {
            Executor::Sequential => (0..n).map(task).collect(),
            Executor::Global => (0..n).into_par_iter().map(task).collect(),
            Executor::Pool(pool) => pool.install(|| (0..n).into_par_iter().map(&task).collect()),
        }
    }

    pub fn is_parallel(&self) -> bool {
        !matches!(self, Executor::Sequential)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Executor::Sequential => write!(f, "Sequential"),
            Executor::Global => write!(f, "Global"),
            Executor::Pool(pool) => write!(f, "Pool({} threads)", pool.current_num_threads()),
        }
    }
}
