use std::{
    cell::Cell,
    io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
    time::Instant,
};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use tracing::trace;

use crate::{
    common::{PoolResult, Task, TaskPanic, WorkerId},
    error::PoolError,
};

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Id of the pool worker running on the calling thread, `None` outside a worker
pub fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

pub(crate) enum Message {
    Run(Task),
    Terminate,
}

/// The reusable part of a worker: its id and single-slot inbox
#[derive(Debug)]
pub(crate) struct Shell {
    id: WorkerId,
    inbox_tx: Sender<Message>,
    inbox_rx: Receiver<Message>,
}

impl Shell {
    pub(crate) fn new(id: WorkerId) -> Self {
        let (inbox_tx, inbox_rx) = channel::bounded(1);
        Self {
            id,
            inbox_tx,
            inbox_rx,
        }
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    /// Dispatch side of this shell, stamped with the current time
    fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.id,
            inbox: self.inbox_tx.clone(),
            last_active: Instant::now(),
        }
    }
}

/// What the pool holds for a live worker: a way to hand it one message
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    id: WorkerId,
    inbox: Sender<Message>,
    last_active: Instant,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn last_active(&self) -> Instant {
        self.last_active
    }

    /// Hand a task to the worker. The inbox is empty whenever the handle is
    /// out of the idle registry, so this never blocks.
    pub(crate) fn dispatch(self, task: Task) -> PoolResult<()> {
        match self.inbox.try_send(Message::Run(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(PoolError::Dispatch)
            }
        }
    }

    /// Ask the worker to leave its loop. Returns `false` if it is already gone.
    pub(crate) fn terminate(&self) -> bool {
        self.inbox.try_send(Message::Terminate).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn detached(id: WorkerId, last_active: Instant) -> Self {
        let (inbox, _) = channel::bounded(1);
        Self {
            id,
            inbox,
            last_active,
        }
    }
}

/// The pool side of a worker's lifecycle
pub(crate) trait WorkerHost: Send + Sync {
    /// Put a worker that just finished a task back into the idle registry.
    /// Returns `false` if the pool no longer takes idle workers.
    fn park(&self, worker: WorkerHandle) -> bool;

    /// Account for a worker that stopped and keep its shell for reuse
    fn retire(&self, shell: Shell);

    fn report_panic(&self, panic: TaskPanic);
}

/// Start the execution loop for `shell` on a new thread
pub(crate) fn spawn<H>(
    shell: Shell,
    host: Arc<H>,
    builder: thread::Builder,
) -> io::Result<WorkerHandle>
where
    H: WorkerHost + 'static,
{
    let handle = shell.handle();
    builder.spawn(move || run(shell, host))?;
    Ok(handle)
}

fn run<H: WorkerHost>(shell: Shell, host: Arc<H>) {
    CURRENT_WORKER.with(|current| current.set(Some(shell.id)));
    trace!(worker = shell.id, "worker started");

    loop {
        let task = match shell.inbox_rx.recv() {
            Ok(Message::Run(task)) => task,
            Ok(Message::Terminate) | Err(_) => break,
        };

        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                if !host.park(shell.handle()) {
                    break;
                }
            }
            Err(payload) => {
                let panic = TaskPanic::from_payload(shell.id, payload.as_ref());
                // Capacity is freed before anyone hears about the panic
                host.retire(shell);
                host.report_panic(panic);
                return;
            }
        }
    }

    trace!(worker = shell.id, "worker stopped");
    host.retire(shell);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Debug)]
    enum Event {
        Parked(WorkerHandle),
        Retired(WorkerId),
        Panicked(TaskPanic),
    }

    struct RecordingHost {
        accept_idle: bool,
        events: Sender<Event>,
        retired_shells: Mutex<Vec<Shell>>,
    }

    impl RecordingHost {
        fn new(accept_idle: bool) -> (Arc<Self>, Receiver<Event>) {
            let (events, rx) = channel::unbounded();
            let host = Arc::new(Self {
                accept_idle,
                events,
                retired_shells: Mutex::new(Vec::new()),
            });
            (host, rx)
        }
    }

    impl WorkerHost for RecordingHost {
        fn park(&self, worker: WorkerHandle) -> bool {
            if self.accept_idle {
                let _ = self.events.send(Event::Parked(worker));
            }
            self.accept_idle
        }

        fn retire(&self, shell: Shell) {
            let _ = self.events.send(Event::Retired(shell.id()));
            self.retired_shells.lock().unwrap().push(shell);
        }

        fn report_panic(&self, panic: TaskPanic) {
            let _ = self.events.send(Event::Panicked(panic));
        }
    }

    fn task(f: impl FnOnce() + Send + 'static) -> Task {
        Box::new(f)
    }

    fn start(id: WorkerId, host: &Arc<RecordingHost>) -> WorkerHandle {
        spawn(Shell::new(id), Arc::clone(host), thread::Builder::new()).unwrap()
    }

    #[test]
    fn test_worker_runs_task_and_parks() {
        let (host, events) = RecordingHost::new(true);
        let worker = start(7, &host);

        let (tx, rx) = channel::bounded(1);
        worker
            .dispatch(task(move || tx.send(current_worker()).unwrap()))
            .unwrap();

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some(7));
        match events.recv_timeout(WAIT).unwrap() {
            Event::Parked(handle) => {
                assert_eq!(handle.id(), 7);
                assert!(handle.terminate());
            }
            other => panic!("expected park, got {:?}", other),
        }
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), Event::Retired(7)));
    }

    #[test]
    fn test_worker_reused_after_park() {
        let (host, events) = RecordingHost::new(true);
        let worker = start(1, &host);

        let (tx, rx) = channel::unbounded();
        let first_tx = tx.clone();
        worker
            .dispatch(task(move || {
                first_tx.send(thread::current().id()).unwrap()
            }))
            .unwrap();
        let parked = match events.recv_timeout(WAIT).unwrap() {
            Event::Parked(handle) => handle,
            other => panic!("expected park, got {:?}", other),
        };

        parked
            .dispatch(task(move || tx.send(thread::current().id()).unwrap()))
            .unwrap();

        let first = rx.recv_timeout(WAIT).unwrap();
        let second = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_panic_retires_then_reports() {
        let (host, events) = RecordingHost::new(true);
        let worker = start(2, &host);

        worker
            .dispatch(task(|| panic!("task exploded")))
            .unwrap();

        assert!(matches!(events.recv_timeout(WAIT).unwrap(), Event::Retired(2)));
        match events.recv_timeout(WAIT).unwrap() {
            Event::Panicked(panic) => {
                assert_eq!(panic.worker, 2);
                assert_eq!(panic.message, "task exploded");
            }
            other => panic!("expected panic report, got {:?}", other),
        }

        // Shell comes back with an empty, still usable inbox
        let shells = host.retired_shells.lock().unwrap();
        assert_eq!(shells.len(), 1);
        assert!(shells[0].inbox_rx.is_empty());
    }

    #[test]
    fn test_terminate_retires_without_parking() {
        let (host, events) = RecordingHost::new(true);
        let worker = start(3, &host);

        assert!(worker.terminate());
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), Event::Retired(3)));
        assert!(events.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_refused_park_retires() {
        let (host, events) = RecordingHost::new(false);
        let worker = start(4, &host);

        worker.dispatch(task(|| {})).unwrap();
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), Event::Retired(4)));
    }

    #[test]
    fn test_dispatch_to_stopped_worker_fails() {
        let (host, events) = RecordingHost::new(true);
        let worker = start(5, &host);

        assert!(worker.terminate());
        assert!(matches!(events.recv_timeout(WAIT).unwrap(), Event::Retired(5)));

        // Dropping the retired shell closes the inbox
        host.retired_shells.lock().unwrap().clear();
        assert!(!worker.terminate());
        let err = worker.dispatch(task(|| {})).unwrap_err();
        assert!(matches!(err, PoolError::Dispatch));
    }

    #[test]
    fn test_current_worker_outside_pool() {
        assert_eq!(current_worker(), None);
    }
}
