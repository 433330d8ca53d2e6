use super::errors::TaskError;
use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};


/// Элемент очереди: позиция во входной последовательности и сам объект
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task<T> {
    pub index: usize,
    pub item: T,
}

impl<T> Task<T> {
    pub fn new(index: usize, item: T) -> Self {
        Self { index, item }
    }
}


type ProcessFn<T, R, E> = dyn Fn(&T) -> Result<R, E> + Send + Sync;

/// Функция обработки вместе с её именем (идентичность функции для `FailureRecord`)
pub struct Processor<T, R, E> {
    name: &'static str,
    func: Arc<ProcessFn<T, R, E>>,
}

impl<T, R, E> Processor<T, R, E> {
    /// Имя берётся из типа функции: для `fn` это путь к ней, для замыкания - путь до `{{closure}}`
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            name: std::any::type_name::<F>(),
            func: Arc::new(func),
        }
    }

    pub fn named<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline(always)]
    pub fn call(&self, item: &T) -> Result<R, E> {
        (self.func)(item)
    }
}

impl<T, R, E> Clone for Processor<T, R, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            func: Arc::clone(&self.func),
        }
    }
}

impl<T, R, E> fmt::Debug for Processor<T, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor").field("name", &self.name).finish()
    }
}


/// Всё, что известно о провалившейся задаче
#[derive(Debug, Clone)]
pub struct FailureRecord<T, E> {
    pub index: usize,
    pub item: T,
    pub processor: &'static str,
    pub error: Arc<TaskError<E>>,
    pub trace: String,
    pub worker: usize,
}

impl<T, E> FailureRecord<T, E> {
    #[inline]
    pub fn is_panic(&self) -> bool {
        self.error.is_panic()
    }
}


#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    pub total_tasks: usize,
    pub queued_tasks: usize,
    pub active_workers: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }

    /// Доля задач, которые уже обработаны (успешно или нет)
    pub fn progress(&self) -> f64 {
        if self.total_tasks == 0 {
            return 1.0;
        }
        (self.completed_tasks + self.failed_tasks) as f64 / self.total_tasks as f64
    }
}


/// Счётчики, которые воркеры обновляют во время запуска
#[derive(Debug, Default)]
pub(crate) struct MetricsCounters {
    pub total_tasks: AtomicUsize,
    pub queued_tasks: AtomicUsize,
    pub active_workers: AtomicUsize,
    pub completed_tasks: AtomicUsize,
    pub failed_tasks: AtomicUsize,
}

impl MetricsCounters {
    /// Счётчики нового запуска: все задачи уже в очереди
    pub fn for_run(total: usize) -> Self {
        Self {
            total_tasks: AtomicUsize::new(total),
            queued_tasks: AtomicUsize::new(total),
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }
}


/// Счётчики последнего начатого запуска.
///
/// У каждого запуска свой экземпляр `MetricsCounters`; запуски, идущие
/// одновременно на одном `ThreadHandler`, пишут каждый в свои.
#[derive(Debug, Default)]
pub(crate) struct MetricsCell {
    current: Mutex<Arc<MetricsCounters>>,
}

impl MetricsCell {
    pub fn publish(&self, total: usize) -> Arc<MetricsCounters> {
        let counters = Arc::new(MetricsCounters::for_run(total));
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&counters);
        counters
    }

    pub fn snapshot(&self) -> PoolMetrics {
        let counters = self.current.lock().unwrap_or_else(PoisonError::into_inner).clone();
        counters.snapshot()
    }
}
