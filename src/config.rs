use std::{fmt, sync::Arc, time::Duration};

use crate::{
    common::{PanicHandler, PoolResult, TaskPanic},
    error::PoolError,
};

/// Idle expire window used by [`crate::Pool::new`]
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(3);

pub const DEFAULT_THREAD_NAME: &str = "taskpool-worker";

#[derive(Clone)]
pub struct PoolConfig {
    /// Maximum number of simultaneously live workers
    pub capacity: usize,
    /// How long a worker may sit idle before it is reclaimed
    pub expire: Duration,
    /// Prefix for worker thread names, suffixed with the worker id
    pub thread_name: String,
    /// Stack size for worker threads, platform default when `None`
    pub stack_size: Option<usize>,
    /// Called after a task panics, replaces the default error log
    pub panic_handler: Option<PanicHandler>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: num_cpus::get(),
            expire: DEFAULT_EXPIRE,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
            panic_handler: None,
        }
    }
}

impl PoolConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    pub fn with_thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn with_panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TaskPanic) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidCapacity);
        }
        if self.expire.is_zero() {
            return Err(PoolError::InvalidExpiry);
        }
        Ok(())
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("capacity", &self.capacity)
            .field("expire", &self.expire)
            .field("thread_name", &self.thread_name)
            .field("stack_size", &self.stack_size)
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}
