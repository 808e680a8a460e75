use std::future::Future;

use tokio::runtime::{Handle, Runtime};

use super::Executor;

/// Executor owning a tokio runtime.
pub struct TokioExecutor {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl TokioExecutor {
    /// Take ownership of `runtime`; it shuts down when the executor drops.
    pub fn new(runtime: Runtime) -> Self {
        Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        }
    }
}

impl Executor for TokioExecutor {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

impl Drop for TokioExecutor {
    fn drop(&mut self) {
        // Dropping a runtime from async context panics; shutdown_background
        // does not.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
