use std::{any::Any, fmt, sync::Arc};

use crate::error::PoolError;

pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// A fire-and-forget unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of a worker shell, stable across recycling
pub type WorkerId = usize;

/// Hook invoked after a task panicked and its worker has been retired
pub type PanicHandler = Arc<dyn Fn(&TaskPanic) + Send + Sync + 'static>;

/// Details of a panic caught at a worker's recovery boundary
#[derive(Debug, Clone)]
pub struct TaskPanic {
    pub worker: WorkerId,
    pub message: String,
}

impl TaskPanic {
    pub(crate) fn from_payload(worker: WorkerId, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        Self { worker, message }
    }
}

impl fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task on worker {} panicked: {}", self.worker, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_str() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        let panic = TaskPanic::from_payload(3, payload.as_ref());
        assert_eq!(panic.worker, 3);
        assert_eq!(panic.message, "boom");
    }

    #[test]
    fn test_panic_payload_string() {
        let payload: Box<dyn Any + Send> = Box::new(format!("bad input {}", 7));
        let panic = TaskPanic::from_payload(0, payload.as_ref());
        assert_eq!(panic.message, "bad input 7");
        assert_eq!(panic.to_string(), "task on worker 0 panicked: bad input 7");
    }

    #[test]
    fn test_panic_payload_opaque() {
        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        let panic = TaskPanic::from_payload(1, payload.as_ref());
        assert_eq!(panic.message, "Box<dyn Any>");
    }
}
