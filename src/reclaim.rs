use std::{
    collections::VecDeque,
    io,
    sync::Weak,
    thread,
    time::{Duration, Instant},
};

use crossbeam::{
    channel::{self, Receiver, Sender},
    select,
};
use tracing::{debug, trace};

use crate::{pool::Shared, worker::WorkerHandle};

/// Keeps the idle reclamation thread alive. Dropping it stops the thread.
#[derive(Debug)]
pub(crate) struct Reclaimer {
    _stop: Sender<()>,
}

pub(crate) fn start(pool: Weak<Shared>, expire: Duration, name: &str) -> io::Result<Reclaimer> {
    let (stop_tx, stop_rx) = channel::bounded(0);

    thread::Builder::new()
        .name(format!("{}-reclaim", name))
        .spawn(move || run(pool, expire, stop_rx))?;

    Ok(Reclaimer { _stop: stop_tx })
}

fn run(pool: Weak<Shared>, expire: Duration, stop: Receiver<()>) {
    let ticker = channel::tick(expire);

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> tick => {
                let Ok(now) = tick else { break };
                let Some(pool) = pool.upgrade() else { break };
                if pool.is_released() {
                    break;
                }

                let reclaimed = pool.reclaim_expired(now);
                if reclaimed > 0 {
                    debug!(reclaimed, running = pool.running(), "reclaimed idle workers");
                }
            }
        }
    }

    trace!("reclaimer stopped");
}

/// Length of the run of workers at the front of `idle` that have been idle
/// longer than `expire`. The registry is ordered oldest to newest, so the
/// scan stops at the first worker still inside the window.
pub(crate) fn expired_prefix(
    idle: &VecDeque<WorkerHandle>,
    now: Instant,
    expire: Duration,
) -> usize {
    idle.iter()
        .take_while(|worker| now.saturating_duration_since(worker.last_active()) > expire)
        .count()
}
