use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

/// A fixed-size rayon pool, built once and shared by every stage.
///
/// Cloning is cheap and clones run on the same threads. If the pool cannot be
/// created, units run on the calling thread instead.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Option<Arc<ThreadPool>>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let pool = match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                debug!(workers, "worker pool ready");
                Some(Arc::new(pool))
            }
            Err(err) => {
                warn!(error = %err, "failed to build worker pool, running sequentially");
                None
            }
        };
        Self { pool, workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `unit` over every item and returns the outcomes in input order.
    ///
    /// Units must not panic or return errors to signal failure; each one
    /// reports its own outcome value.
    pub fn run<T, R, F>(&self, items: &[T], unit: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().map(&unit).collect()),
            None => items.iter().map(unit).collect(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("threaded", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn keeps_input_order() {
        let pool = WorkerPool::new(4);
        let items: Vec<u32> = (0..100).collect();
        let doubled = pool.run(&items, |value| value * 2);
        assert_eq!(doubled, (0..100).map(|v| v * 2).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input() {
        let pool = WorkerPool::new(3);
        let items: Vec<u32> = Vec::new();
        assert!(pool.run(&items, |value| *value).is_empty());
    }

    #[test]
    fn repeated_runs_reuse_the_same_threads() {
        let pool = WorkerPool::new(2);
        let seen = Mutex::new(HashSet::new());
        let items: Vec<u32> = (0..64).collect();
        for _ in 0..5 {
            pool.run(&items, |_| {
                seen.lock().unwrap().insert(std::thread::current().id());
            });
        }
        assert_eq!(pool.workers(), 2);
        assert!(seen.lock().unwrap().len() <= 2);
    }

    #[test]
    fn zero_workers_still_runs() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.workers(), 1);
        assert_eq!(pool.run(&[1, 2, 3], |v| v + 1), vec![2, 3, 4]);
    }
}
