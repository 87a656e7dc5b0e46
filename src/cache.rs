use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;

/// A bounded free-list of retired objects that are cheaper to reuse than rebuild
pub(crate) struct RecycleCache<T> {
    /// Retired objects waiting to be handed out again
    objects: ArrayQueue<T>,
    /// Function to create new objects when the cache is empty
    create_fn: Box<dyn Fn() -> T + Send + Sync>,
    /// Number of objects built by `create_fn`
    created: AtomicUsize,
    /// Number of `get` calls served from the free-list
    reused: AtomicUsize,
}

impl<T> RecycleCache<T> {
    /// Create an empty cache holding at most `max_size` retired objects
    ///
    /// # Parameters
    ///
    /// * `max_size` - The maximum number of retired objects kept around
    /// * `create_fn` - A function that builds a fresh object when the cache is empty
    pub(crate) fn new<F>(max_size: usize, create_fn: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            objects: ArrayQueue::new(max_size.max(1)),
            create_fn: Box::new(create_fn),
            created: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Take a retired object, or build a new one if none is cached
    pub(crate) fn get(&self) -> T {
        match self.objects.pop() {
            Some(object) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                object
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.create_fn)()
            }
        }
    }

    /// Hand an object back. Returns `false` and drops it when the cache is full.
    pub(crate) fn put(&self, object: T) -> bool {
        self.objects.push(object).is_ok()
    }

    /// Number of retired objects currently cached
    pub(crate) fn available(&self) -> usize {
        self.objects.len()
    }

    /// Maximum number of retired objects kept around
    pub(crate) fn max_size(&self) -> usize {
        self.objects.capacity()
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub(crate) fn reused(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for RecycleCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecycleCache")
            .field("available", &self.available())
            .field("max_size", &self.max_size())
            .field("created", &self.created())
            .field("reused", &self.reused())
            .finish()
    }
}
