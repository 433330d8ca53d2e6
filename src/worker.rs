use super::{
    errors::TaskError,
    handle::WorkerHandle,
    model::{FailureRecord, MetricsCounters, Processor, Task},
    queue::WorkQueue,
    result::ResultSlots,
};
use std::{
    any::Any,
    backtrace::Backtrace,
    cell::{Cell, RefCell},
    io,
    panic::{self, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc, Once},
    thread,
};
use tokio::sync::oneshot;


/// Что воркер отдаёт координатору после завершения
#[derive(Debug)]
pub struct WorkerReport<T, E> {
    pub worker: usize,
    pub processed: usize,
    pub failures: Vec<FailureRecord<T, E>>,
}

impl<T, E> WorkerReport<T, E> {
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}


/// Цикл воркера. По умолчанию - `DrainQueue`.
///
/// Стратегия решает, когда брать следующий элемент; сама обработка
/// (перехват ошибок и паник, запись слота, `mark_done`) всегда идёт через
/// `Worker::process_next`. Если стратегия вернулась, а в очереди ещё есть
/// задачи, воркер разбирает остаток сам.
pub trait WorkerStrategy<T, R, E>: Send + Sync {
    fn run(&self, worker: &mut Worker<T, R, E>);
}

/// Разбирает очередь, пока она не опустеет
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainQueue;

impl<T, R, E> WorkerStrategy<T, R, E> for DrainQueue
where
    T: Send + 'static,
    R: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn run(&self, worker: &mut Worker<T, R, E>) {
        while worker.process_next() {}
    }
}

impl<T, R, E, F> WorkerStrategy<T, R, E> for F
where
    F: Fn(&mut Worker<T, R, E>) + Send + Sync,
{
    fn run(&self, worker: &mut Worker<T, R, E>) {
        self(worker)
    }
}


thread_local! {
    static IN_TASK: Cell<bool> = const { Cell::new(false) };
    static PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Оборачивает текущий panic hook: для паник внутри задачи запоминает
/// место паники и backtrace, снятый в момент паники. Дальше вызывается прежний hook.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_TASK.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                    .unwrap_or_else(|| "<unknown>".to_string());
                let trace = format!("panicked at {}\n{}", location, Backtrace::capture());
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}


pub struct Worker<T, R, E> {
    id: usize,
    queue: Arc<WorkQueue<T>>,
    slots: Arc<ResultSlots<R>>,
    processor: Processor<T, R, E>,
    metrics: Arc<MetricsCounters>,
    strategy: Arc<dyn WorkerStrategy<T, R, E>>,
    processed: usize,
    failures: Vec<FailureRecord<T, E>>,
}

impl<T, R, E> Worker<T, R, E>
where
    T: Send + 'static,
    R: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub(crate) fn new(
        id: usize,
        queue: Arc<WorkQueue<T>>,
        slots: Arc<ResultSlots<R>>,
        processor: Processor<T, R, E>,
        metrics: Arc<MetricsCounters>,
        strategy: Arc<dyn WorkerStrategy<T, R, E>>,
    ) -> Self {
        Self {
            id,
            queue,
            slots,
            processor,
            metrics,
            strategy,
            processed: 0,
            failures: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn processed(&self) -> usize {
        self.processed
    }

    #[inline]
    pub fn failures(&self) -> &[FailureRecord<T, E>] {
        &self.failures
    }

    /// Сколько задач ещё лежит в общей очереди
    #[inline]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Запускает воркер в отдельном именованном потоке.
    /// Отчёт приходит через oneshot, поэтому координатор может ждать его с таймаутом.
    pub fn spawn(self, thread_name: &str) -> io::Result<WorkerHandle<T, E>> {
        let id = self.id;
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name(format!("{}-{}", thread_name, id))
            .spawn(move || {
                let report = self.run();
                let _ = tx.send(report);
            })?;

        Ok(WorkerHandle::new(id, rx))
    }

    /// Выполняет стратегию и дорабатывает то, что она оставила в очереди
    pub fn run(mut self) -> WorkerReport<T, E> {
        install_panic_hook();
        self.metrics.active_workers.fetch_add(1, Ordering::Relaxed);

        let strategy = Arc::clone(&self.strategy);
        if panic::catch_unwind(AssertUnwindSafe(|| strategy.run(&mut self))).is_err() {
            tracing::error!(worker = self.id, "worker strategy panicked");
        }
        if !self.queue.is_empty() {
            tracing::warn!(
                worker = self.id,
                remaining = self.queue.len(),
                "strategy returned before the queue was drained"
            );
            while self.process_next() {}
        }

        self.metrics.active_workers.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!(worker = self.id, processed = self.processed, failed = self.failures.len(), "worker finished");

        WorkerReport {
            worker: self.id,
            processed: self.processed,
            failures: self.failures,
        }
    }

    /// Берёт следующий элемент и обрабатывает его. `false` - очередь пуста.
    pub fn process_next(&mut self) -> bool {
        let Some(task) = self.queue.try_get() else {
            return false;
        };
        self.metrics.queued_tasks.fetch_sub(1, Ordering::Relaxed);
        self.process(task);
        true
    }

    fn process(&mut self, task: Task<T>) {
        IN_TASK.with(|flag| flag.set(true));
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.processor.call(&task.item)));
        IN_TASK.with(|flag| flag.set(false));

        let header = || {
            format!(
                "worker {} failed on item {} in `{}`",
                self.id,
                task.index,
                self.processor.name()
            )
        };
        let failure = match result {
            Ok(Ok(value)) => {
                let written = self.slots.set(task.index, value);
                debug_assert!(written, "result slot {} written twice", task.index);
                self.metrics.completed_tasks.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(worker = self.id, index = task.index, "task completed");
                None
            }
            Ok(Err(e)) => Some((TaskError::Failed(e), format!("{}: returned an error", header()))),
            Err(payload) => {
                let at = PANIC_TRACE
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_else(|| "panic location unavailable".to_string());
                Some((TaskError::Panicked(panic_message(payload)), format!("{}\n{}", header(), at)))
            }
        };

        if let Some((error, trace)) = failure {
            tracing::warn!(
                worker = self.id,
                index = task.index,
                processor = self.processor.name(),
                panicked = error.is_panic(),
                "task failed"
            );
            self.failures.push(FailureRecord {
                index: task.index,
                item: task.item,
                processor: self.processor.name(),
                error: Arc::new(error),
                trace,
                worker: self.id,
            });
            self.metrics.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }

        self.processed += 1;
        self.queue.mark_done();
    }
}


fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn setup(items: &[i32]) -> (Arc<WorkQueue<i32>>, Arc<ResultSlots<i32>>, Arc<MetricsCounters>) {
        let queue = Arc::new(WorkQueue::new());
        for (i, item) in items.iter().enumerate() {
            queue.put(Task::new(i, *item));
        }
        let metrics = Arc::new(MetricsCounters::for_run(items.len()));
        (queue, Arc::new(ResultSlots::new(items.len())), metrics)
    }

    fn drain() -> Arc<dyn WorkerStrategy<i32, i32, String>> {
        Arc::new(DrainQueue)
    }

    #[test]
    fn worker_captures_errors_and_panics_and_keeps_draining() {
        let (queue, slots, metrics) = setup(&[1, 2, 3, 4]);
        let processor = Processor::named("picky", |x: &i32| match *x {
            2 => Err("two".to_string()),
            3 => panic!("three"),
            n => Ok(n * 10),
        });

        let prev_hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let report = Worker::new(0, queue.clone(), slots.clone(), processor, metrics.clone(), drain()).run();
        panic::set_hook(prev_hook);

        assert_eq!(report.processed, 4);
        assert!(report.has_failures());
        assert_eq!(report.failures.len(), 2);

        let returned = &report.failures[0];
        assert_eq!(returned.index, 1);
        assert_eq!(returned.item, 2);
        assert_eq!(returned.processor, "picky");
        assert_eq!(*returned.error, TaskError::Failed("two".to_string()));
        assert_eq!(returned.trace, "worker 0 failed on item 1 in `picky`: returned an error");

        let panicked = &report.failures[1];
        assert_eq!(panicked.index, 2);
        assert_eq!(*panicked.error, TaskError::Panicked("three".to_string()));
        assert!(panicked.trace.starts_with("worker 0 failed on item 2 in `picky`\n"));

        assert_eq!(queue.unfinished(), 0);
        assert_eq!(slots.get(0), Some(&10));
        assert!(!slots.is_set(1));
        assert!(!slots.is_set(2));
        assert_eq!(slots.get(3), Some(&40));

        let m = metrics.snapshot();
        assert_eq!((m.completed_tasks, m.failed_tasks, m.queued_tasks, m.active_workers), (2, 2, 0, 0));
    }

    #[test]
    fn leftover_tasks_are_drained_after_strategy_returns() {
        let (queue, slots, metrics) = setup(&[1, 2, 3]);
        let processor = Processor::new(|x: &i32| Ok::<_, String>(x + 1));

        // Стратегия обрабатывает один элемент и выходит
        let seen = Arc::new(std::sync::Mutex::new(None));
        let record = seen.clone();
        let one_only: Arc<dyn WorkerStrategy<i32, i32, String>> =
            Arc::new(move |worker: &mut Worker<i32, i32, String>| {
                let took = worker.process_next();
                *record.lock().unwrap() = Some((took, worker.processed(), worker.remaining()));
            });

        let report = Worker::new(1, queue.clone(), slots.clone(), processor, metrics, one_only).run();
        assert_eq!(*seen.lock().unwrap(), Some((true, 1, 2)));
        assert_eq!(report.processed, 3);
        assert_eq!(queue.unfinished(), 0);
        assert_eq!(Arc::into_inner(slots).unwrap().into_vec(), vec![Some(2), Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn spawned_worker_reports_through_handle() {
        let (queue, slots, metrics) = setup(&[5, 6]);
        let processor = Processor::new(|x: &i32| Ok::<_, String>(x + 1));

        let handle = Worker::new(3, queue, slots.clone(), processor, metrics, drain())
            .spawn("test-worker")
            .unwrap();
        assert_eq!(handle.worker(), 3);

        let report = handle.await_timeout(std::time::Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.worker, 3);
        assert_eq!(report.processed, 2);
        assert!(!report.has_failures());
        assert_eq!(slots.get(1), Some(&7));
    }
}
