use std::{
    io,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;


/// Ошибки конфигурации: обнаруживаются до того, как создана хотя бы одна задача
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("worker join timeout must be greater than zero")]
    ZeroJoinTimeout,

    #[error("input reported {expected} items but yielded {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Ошибка обработки одного элемента. Никогда не роняет воркер.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TaskError<E> {
    #[error("{0}")]
    Failed(E),

    #[error("processing function panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }

    /// Ошибка, которую вернула сама функция обработки (если это не паника)
    pub fn inner(&self) -> Option<&E> {
        match self {
            TaskError::Failed(e) => Some(e),
            TaskError::Panicked(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    /// Первая (в порядке join воркеров) ошибка запуска с `fail_silently = false`.
    /// Остальные доступны через `ThreadHandler::failures`.
    #[error("task {index} failed in `{processor}`: {error}")]
    TaskFailed {
        index: usize,
        processor: &'static str,
        error: Arc<TaskError<E>>,
    },

    #[error("worker {worker} did not finish within {timeout:?}")]
    WorkerTimeout { worker: usize, timeout: Duration },

    #[error("worker {worker} exited without reporting")]
    WorkerLost { worker: usize },

    #[error("result slots are still referenced by a worker")]
    SlotsShared,

    #[error("queue was not drained within {0:?}")]
    QueueTimeout(Duration),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to build runtime: {0}")]
    Runtime(#[source] io::Error),
}

impl<E> PoolError<E> {
    /// Ошибка функции обработки, если запуск упал именно из-за задачи
    pub fn task_error(&self) -> Option<&TaskError<E>> {
        match self {
            PoolError::TaskFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}
