//! Worker pool for bounded task concurrency.
//!
//! The `WorkerPool` hands out permits for running a task. At most
//! `capacity` permits exist at once; dropping a permit returns it. The pool
//! also tracks how many permits are out and the highest that number ever
//! reached, which the executor reports as peak concurrency.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded pool of execution slots.
///
/// Cloning is cheap and every clone shares the same slots.
///
/// # Example
///
/// ```ignore
/// use conductor::orchestration::WorkerPool;
///
/// let pool = WorkerPool::new(2);
/// let permit = pool.acquire().await?;
/// assert_eq!(pool.in_flight(), 1);
/// drop(permit);
/// assert_eq!(pool.in_flight(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with `capacity` slots.
    ///
    /// A capacity of zero is raised to one so the pool can always make
    /// progress.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pool sized for a phase: one slot per task, capped at `max_concurrency`.
    pub fn for_phase(task_count: usize, max_concurrency: usize) -> Self {
        Self::new(task_count.min(max_concurrency))
    }

    /// Wait for a free slot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Runner` if the semaphore has been closed.
    pub async fn acquire(&self) -> Result<PoolPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Runner("worker pool closed".to_string()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(PoolPermit {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Stop handing out permits; pending and future `acquire` calls fail.

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }
}

/// A held execution slot. Released on drop.
#[derive(Debug)]
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
