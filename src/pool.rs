use std::{
    collections::VecDeque,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, trace};

use crate::{
    cache::RecycleCache,
    common::{PanicHandler, PoolResult, Task, TaskPanic},
    config::{DEFAULT_EXPIRE, PoolConfig},
    error::PoolError,
    reclaim::{self, Reclaimer},
    worker::{self, Shell, WorkerHandle, WorkerHost},
};

/// Upper bound on retired worker shells kept for reuse, whatever the capacity
const MAX_CACHED_SHELLS: usize = 1024;

/// Point-in-time view of a pool's gauges. Values are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub running: usize,
    pub idle: usize,
    pub free: usize,
    pub cached_shells: usize,
}

#[derive(Debug)]
struct State {
    /// Idle workers, oldest at the front, most recently parked at the back
    idle: VecDeque<WorkerHandle>,
    closed: bool,
    reclaimer: Option<Reclaimer>,
}

/// Everything workers and the reclaimer share with the pool
pub(crate) struct Shared {
    capacity: usize,
    expire: Duration,
    /// Live workers, busy or idle. Only changed while `state` is locked.
    running: AtomicUsize,
    state: Mutex<State>,
    waiters: Condvar,
    shells: RecycleCache<Shell>,
    thread_name: String,
    stack_size: Option<usize>,
    panic_handler: Option<PanicHandler>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        // Tasks never run under this lock, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.lock_state().closed
    }

    /// Get an idle worker, spawn one into free capacity, or wait for either.
    /// With `block == false` a saturated pool fails with `Overloaded` instead.
    fn acquire_worker(self: &Arc<Self>, block: bool) -> PoolResult<WorkerHandle> {
        let mut state = self.lock_state();

        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }

            if let Some(worker) = state.idle.pop_back() {
                return Ok(worker);
            }

            // Capacity is re-checked on every wake: a panicked task frees a
            // slot without ever returning a worker to the idle registry.
            if self.running.load(Ordering::Acquire) < self.capacity {
                self.running.fetch_add(1, Ordering::AcqRel);
                drop(state);
                return self.spawn_worker();
            }

            if !block {
                return Err(PoolError::Overloaded);
            }

            state = self
                .waiters
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Start a worker in a slot already counted in `running`
    fn spawn_worker(self: &Arc<Self>) -> PoolResult<WorkerHandle> {
        let shell = self.shells.get();
        let id = shell.id();

        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name, id));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        match worker::spawn(shell, Arc::clone(self), builder) {
            Ok(worker) => {
                debug!(worker = id, running = self.running(), "spawned worker");
                Ok(worker)
            }
            Err(err) => {
                {
                    let _state = self.lock_state();
                    self.running.fetch_sub(1, Ordering::AcqRel);
                }
                self.waiters.notify_one();
                error!(worker = id, error = %err, "failed to spawn worker thread");
                Err(PoolError::Spawn(err))
            }
        }
    }

    /// Terminate the idle workers whose expire window has passed.
    /// Returns how many were reclaimed.
    pub(crate) fn reclaim_expired(&self, now: Instant) -> usize {
        let expired: Vec<WorkerHandle> = {
            let mut state = self.lock_state();
            let count = reclaim::expired_prefix(&state.idle, now, self.expire);
            state.idle.drain(..count).collect()
        };

        for worker in &expired {
            // Each worker decrements `running` itself on the way out
            if !worker.terminate() {
                trace!(worker = worker.id(), "reclaimed worker already stopped");
            }
        }

        expired.len()
    }

    fn release(&self) -> bool {
        let (idle, reclaimer) = {
            let mut state = self.lock_state();
            if state.closed {
                return false;
            }
            state.closed = true;
            (mem::take(&mut state.idle), state.reclaimer.take())
        };

        drop(reclaimer);
        for worker in &idle {
            worker.terminate();
        }
        // Blocked submitters must observe the closed latch
        self.waiters.notify_all();

        info!(stopped_idle = idle.len(), running = self.running(), "pool released");
        true
    }
}

impl WorkerHost for Shared {
    fn park(&self, worker: WorkerHandle) -> bool {
        let mut state = self.lock_state();
        if state.closed {
            return false;
        }

        trace!(worker = worker.id(), "worker parked");
        state.idle.push_back(worker);
        drop(state);
        self.waiters.notify_one();
        true
    }

    fn retire(&self, shell: Shell) {
        let id = shell.id();
        {
            let _state = self.lock_state();
            self.running.fetch_sub(1, Ordering::AcqRel);
        }
        self.shells.put(shell);
        self.waiters.notify_one();
        trace!(worker = id, running = self.running(), "worker retired");
    }

    fn report_panic(&self, panic: TaskPanic) {
        match &self.panic_handler {
            Some(handler) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&panic))).is_err() {
                    error!(worker = panic.worker, "panic handler panicked");
                }
            }
            None => {
                let current = thread::current();
                error!(
                    worker = panic.worker,
                    thread = current.name().unwrap_or("<unnamed>"),
                    panic = %panic.message,
                    "task panicked"
                );
            }
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("capacity", &self.capacity)
            .field("expire", &self.expire)
            .field("running", &self.running())
            .field("shells", &self.shells)
            .finish()
    }
}

/// A bounded pool of worker threads that run fire-and-forget tasks.
///
/// At most `capacity` workers are alive at once. Workers are spawned on
/// demand, reused most-recently-idle first, and stopped after sitting idle
/// for longer than the expire window. When every worker is busy,
/// [`Pool::submit`] blocks until one frees up.
///
/// A task that panics is contained: its worker is retired, the capacity
/// slot is freed, and the panic goes to the configured handler or the log.
///
/// Dropping the pool releases it.
pub struct Pool {
    shared: Arc<Shared>,
}

impl Pool {
    /// Create a pool of `capacity` workers with the default expire window
    pub fn new(capacity: usize) -> PoolResult<Self> {
        Self::with_expiry(capacity, DEFAULT_EXPIRE)
    }

    /// Create a pool whose idle workers are reclaimed after `expire`
    pub fn with_expiry(capacity: usize, expire: Duration) -> PoolResult<Self> {
        Self::with_config(PoolConfig::new(capacity).with_expire(expire))
    }

    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let PoolConfig {
            capacity,
            expire,
            thread_name,
            stack_size,
            panic_handler,
        } = config;

        let next_id = AtomicUsize::new(0);
        let shells = RecycleCache::new(capacity.min(MAX_CACHED_SHELLS), move || {
            Shell::new(next_id.fetch_add(1, Ordering::Relaxed))
        });

        let shared = Arc::new(Shared {
            capacity,
            expire,
            running: AtomicUsize::new(0),
            state: Mutex::new(State {
                idle: VecDeque::new(),
                closed: false,
                reclaimer: None,
            }),
            waiters: Condvar::new(),
            shells,
            thread_name,
            stack_size,
            panic_handler,
        });

        let reclaimer = reclaim::start(Arc::downgrade(&shared), expire, &shared.thread_name)?;
        shared.lock_state().reclaimer = Some(reclaimer);

        debug!(capacity, ?expire, "pool created");
        Ok(Self { shared })
    }

    /// Run `task` on a pool worker.
    ///
    /// Blocks while the pool is saturated. Fails with [`PoolError::Closed`]
    /// once the pool has been released. The task's own outcome is never
    /// reported here.
    pub fn submit<F>(&self, task: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(Box::new(task), true)
    }

    /// Like [`Pool::submit`], but fails with [`PoolError::Overloaded`]
    /// instead of waiting for a worker.
    pub fn try_submit<F>(&self, task: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(Box::new(task), false)
    }

    fn dispatch(&self, task: Task, block: bool) -> PoolResult<()> {
        let worker = self.shared.acquire_worker(block)?;
        worker.dispatch(task)
    }

    /// Number of live workers, busy or idle
    pub fn running(&self) -> usize {
        self.shared.running()
    }

    /// Capacity not taken by live workers
    pub fn free(&self) -> usize {
        self.shared.capacity.saturating_sub(self.running())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of workers waiting in the idle registry
    pub fn idle(&self) -> usize {
        self.shared.lock_state().idle.len()
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.idle();
        let running = self.running();
        PoolStats {
            capacity: self.shared.capacity,
            running,
            idle,
            free: self.shared.capacity.saturating_sub(running),
            cached_shells: self.shared.shells.available(),
        }
    }

    /// Stop accepting tasks and stop every idle worker.
    ///
    /// Busy workers finish their current task and then exit. Calling this
    /// more than once has no further effect.
    pub fn release(&self) {
        self.shared.release();
    }

    pub fn is_released(&self) -> bool {
        self.shared.is_released()
    }

    /// Reopen a released pool. Returns `false` if the idle reclaimer could
    /// not be restarted, in which case the pool stays closed.
    pub fn restart(&self) -> bool {
        let mut state = self.shared.lock_state();
        if !state.closed {
            return true;
        }

        match reclaim::start(
            Arc::downgrade(&self.shared),
            self.shared.expire,
            &self.shared.thread_name,
        ) {
            Ok(reclaimer) => {
                state.reclaimer = Some(reclaimer);
                state.closed = false;
                info!(capacity = self.shared.capacity, "pool restarted");
                true
            }
            Err(err) => {
                error!(error = %err, "failed to restart idle reclaimer");
                false
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.shared.capacity)
            .field("running", &self.running())
            .field("released", &self.is_released())
            .finish()
    }
}
