//! Worker pools for the RPC server. All pools implement the
//! [ThreadPool] trait; the server is generic over which one it runs on.

use crate::Result;

mod rayon;
mod shared_queue;

pub use self::rayon::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;

/// The trait that all thread pools should implement.
pub trait ThreadPool {
    /// Creates a new thread pool, immediately spawning the specified
    /// number of threads.
    ///
    /// Returns an error if any thread fails to spawn.
    fn new(num_threads: usize) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    ///
    /// Spawning always succeeds. A job that panics does not shrink the
    /// pool or corrupt it; the remaining threads keep serving.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}
