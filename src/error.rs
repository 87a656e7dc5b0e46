use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool capacity must be greater than zero")]
    InvalidCapacity,

    #[error("pool expire window must be greater than zero")]
    InvalidExpiry,

    #[error("pool has been released")]
    Closed,

    #[error("pool is saturated and has no idle worker")]
    Overloaded,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("worker inbox rejected the task")]
    Dispatch,
}
