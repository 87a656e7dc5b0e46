//! A bounded pool of reusable worker threads for fire-and-forget tasks.
//!
//! ```no_run
//! use taskpool::Pool;
//!
//! let pool = Pool::new(4)?;
//! pool.submit(|| println!("hello from a worker"))?;
//! # Ok::<(), taskpool::PoolError>(())
//! ```

pub mod common;
pub mod config;
pub mod error;
pub mod pool;

mod cache;
mod reclaim;
mod worker;

pub use common::{PanicHandler, PoolResult, Task, TaskPanic, WorkerId};
pub use config::{DEFAULT_EXPIRE, PoolConfig};
pub use error::PoolError;
pub use pool::{Pool, PoolStats};
pub use worker::current_worker;
