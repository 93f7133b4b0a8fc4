use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderPoolError {
    #[error("rendering thread count must be at least 1")]
    ZeroThreads,
    #[error("failed to build rendering thread pool: {0}")]
    Build(#[from] ThreadPoolBuildError),
}

/// Worker pool for per-pixel projector work.
pub struct RenderPool {
    pool: ThreadPool,
    num_threads: usize,
}

impl RenderPool {
    pub fn new(num_threads: usize) -> Result<Self, RenderPoolError> {
        if num_threads == 0 {
            return Err(RenderPoolError::ZeroThreads);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("render_worker_{index}"))
            .build()?;
        Ok(Self { pool, num_threads })
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `work` inside the pool so nested rayon iterators use its workers.
    pub fn install<R, F>(&self, work: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(work)
    }
}

impl std::fmt::Debug for RenderPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RenderPool")
            .field("num_threads", &self.num_threads)
            .finish()
    }
}
