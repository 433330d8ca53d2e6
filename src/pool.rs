use super::{
    errors::{ConfigError, PoolError},
    model::{FailureRecord, MetricsCell, PoolMetrics, Processor, Task},
    queue::WorkQueue,
    result::{PoolResult, ResultSlots, RunOutcome},
    worker::{DrainQueue, Worker, WorkerStrategy},
};
use std::{
    sync::Arc,
    time::Instant,
};
use futures::future::join_all;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;


/// Конфигурация пула
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub fail_silently: bool,
    /// Сколько ждать отчёт каждого воркера после того, как очередь разобрана
    pub join_timeout: Duration,
    /// Ограничение на ожидание разбора очереди; `None` - ждать сколько потребуется
    pub queue_timeout: Option<Duration>,
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            fail_silently: false,
            join_timeout: Duration::from_secs(30),
            queue_timeout: None,
            thread_name: "thread-handler".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn cpu_bound() -> Self {
        Self {
            worker_count: num_cpus::get(),
            ..Default::default()
        }
    }

    /// Функция обработки большую часть времени ждёт I/O
    pub fn io_bound() -> Self {
        Self {
            worker_count: num_cpus::get() * 2,
            ..Default::default()
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_fail_silently(mut self, fail_silently: bool) -> Self {
        self.fail_silently = fail_silently;
        self
    }

    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn with_queue_timeout(mut self, queue_timeout: Duration) -> Self {
        self.queue_timeout = Some(queue_timeout);
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::ZeroJoinTimeout);
        }
        Ok(())
    }
}


/// Переопределения для одного запуска. `None` - взять значение из `ThreadHandler`.
pub struct RunOptions<T, R, E> {
    processor: Option<Processor<T, R, E>>,
    strategy: Option<Arc<dyn WorkerStrategy<T, R, E>>>,
    items: Option<Result<Vec<T>, ConfigError>>,
    worker_count: Option<usize>,
    fail_silently: Option<bool>,
}

impl<T, R, E> Default for RunOptions<T, R, E> {
    fn default() -> Self {
        Self {
            processor: None,
            strategy: None,
            items: None,
            worker_count: None,
            fail_silently: None,
        }
    }
}

impl<T, R, E> RunOptions<T, R, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processor<F>(self, func: F) -> Self
    where
        F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
    {
        self.with_processor(Processor::new(func))
    }

    pub fn with_processor(mut self, processor: Processor<T, R, E>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn strategy<S>(mut self, strategy: S) -> Self
    where
        S: WorkerStrategy<T, R, E> + 'static,
    {
        self.strategy = Some(Arc::new(strategy));
        self
    }

    /// Пустой список тоже считается переопределением
    pub fn items<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        self.items = Some(collect_exact(items));
        self
    }

    /// `Some(0)` не означает "по умолчанию": запуск вернёт `ConfigError::ZeroWorkers`
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = Some(worker_count);
        self
    }

    pub fn fail_silently(mut self, fail_silently: bool) -> Self {
        self.fail_silently = Some(fail_silently);
        self
    }
}


fn collect_exact<T, I>(items: I) -> Result<Vec<T>, ConfigError>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
{
    let iter = items.into_iter();
    let expected = iter.len();
    let collected: Vec<T> = iter.take(expected.saturating_add(1)).collect();
    if collected.len() != expected {
        return Err(ConfigError::LengthMismatch {
            expected,
            actual: collected.len(),
        });
    }
    Ok(collected)
}


/// Координатор: раскладывает элементы по воркерам, собирает результаты
/// в порядке входа и решает, что делать с ошибками задач.
///
/// ```no_run
/// use thread_handler::ThreadHandler;
///
/// # async fn demo() {
/// let mut handler = ThreadHandler::new(
///     |s: &String| Ok::<_, String>(format!("{s}{s}")),
///     vec!["a".to_string(), "b".to_string()],
/// ).unwrap();
/// let results = handler.run().await.unwrap();
/// assert_eq!(results, vec![Some("aa".to_string()), Some("bb".to_string())]);
/// # }
/// ```
pub struct ThreadHandler<T, R, E> {
    processor: Processor<T, R, E>,
    strategy: Arc<dyn WorkerStrategy<T, R, E>>,
    items: Vec<T>,
    config: PoolConfig,
    failures: Vec<FailureRecord<T, E>>,
    metrics: Arc<MetricsCell>,
}

impl<T, R, E> ThreadHandler<T, R, E>
where
    T: Clone + Send + 'static,
    R: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new<F, I>(func: F, items: I) -> Result<Self, ConfigError>
    where
        F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        Self::with_config(func, items, PoolConfig::default())
    }

    pub fn with_config<F, I>(func: F, items: I, config: PoolConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&T) -> Result<R, E> + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        Self::from_processor(Processor::new(func), items, config)
    }

    pub fn from_processor<I>(
        processor: Processor<T, R, E>,
        items: I,
        config: PoolConfig,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        config.validate()?;
        let items = collect_exact(items)?;

        Ok(Self {
            processor,
            strategy: Arc::new(DrainQueue),
            items,
            config,
            failures: Vec::new(),
            metrics: Arc::new(MetricsCell::default()),
        })
    }

    /// Своя стратегия воркеров вместо `DrainQueue`
    pub fn with_strategy<S>(mut self, strategy: S) -> Self
    where
        S: WorkerStrategy<T, R, E> + 'static,
    {
        self.strategy = Arc::new(strategy);
        self
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[inline]
    pub fn processor_name(&self) -> &'static str {
        self.processor.name()
    }

    /// Ошибки последнего `run` / `run_with` в порядке join воркеров
    #[inline]
    pub fn failures(&self) -> &[FailureRecord<T, E>] {
        &self.failures
    }

    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn take_failures(&mut self) -> Vec<FailureRecord<T, E>> {
        std::mem::take(&mut self.failures)
    }

    /// Запуск с параметрами по умолчанию
    pub async fn run(&mut self) -> PoolResult<Vec<Option<R>>, E> {
        self.run_with(RunOptions::default()).await
    }

    /// Строгий запуск: при ошибках и `fail_silently = false` возвращает первую ошибку,
    /// остальные остаются в `failures()`. Все элементы обрабатываются в любом случае.
    pub async fn run_with(&mut self, options: RunOptions<T, R, E>) -> PoolResult<Vec<Option<R>>, E> {
        self.failures.clear();
        let fail_silently = options.fail_silently.unwrap_or(self.config.fail_silently);

        let RunOutcome { results, failures, .. } = self.run_outcome(options).await?;
        self.failures = failures;

        if let Some(first) = self.failures.first() {
            if !fail_silently {
                return Err(PoolError::TaskFailed {
                    index: first.index,
                    processor: first.processor,
                    error: Arc::clone(&first.error),
                });
            }
        }

        Ok(results)
    }

    /// Запуск без политики ошибок: слоты и список ошибок возвращаются вместе.
    /// `fail_silently` здесь ни на что не влияет.
    pub async fn run_outcome(&self, options: RunOptions<T, R, E>) -> PoolResult<RunOutcome<T, R, E>, E> {
        let started = Instant::now();
        let processor = options.processor.unwrap_or_else(|| self.processor.clone());
        let strategy = options.strategy.unwrap_or_else(|| Arc::clone(&self.strategy));
        let requested = options.worker_count.unwrap_or(self.config.worker_count);
        if requested == 0 {
            return Err(ConfigError::ZeroWorkers.into());
        }

        let queue = Arc::new(WorkQueue::new());
        let count = {
            let overridden = options.items.transpose()?;
            let items = overridden.as_deref().unwrap_or(self.items.as_slice());

            // Очередь заполняется целиком до старта воркеров
            for (index, item) in items.iter().enumerate() {
                queue.put(Task::new(index, item.clone()));
            }
            items.len()
        };

        let workers = requested.min(count);
        let slots = Arc::new(ResultSlots::new(count));

        let metrics = self.metrics.publish(count);

        tracing::debug!(
            items = count,
            requested,
            workers,
            processor = processor.name(),
            "starting run"
        );

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker::new(
                id,
                queue.clone(),
                slots.clone(),
                processor.clone(),
                metrics.clone(),
                strategy.clone(),
            );
            let handle = worker.spawn(&self.config.thread_name).map_err(|e| {
                tracing::error!(worker = id, error = %e, "failed to spawn worker thread");
                PoolError::Spawn(e)
            })?;
            handles.push(handle);
        }

        match self.config.queue_timeout {
            Some(limit) => {
                if !queue.join_timeout(limit).await {
                    tracing::error!(?limit, unfinished = queue.unfinished(), "queue was not drained in time");
                    return Err(PoolError::QueueTimeout(limit));
                }
            }
            None => queue.join().await,
        }

        let join_timeout = self.config.join_timeout;
        let reports = join_all(handles.into_iter().map(|h| h.await_timeout(join_timeout))).await;

        let mut failures = Vec::new();
        for report in reports {
            failures.extend(report?.failures);
        }

        let results = Arc::into_inner(slots)
            .ok_or(PoolError::SlotsShared)?
            .into_vec();

        tracing::debug!(
            items = count,
            workers,
            failed = failures.len(),
            elapsed = ?started.elapsed(),
            "run finished"
        );

        Ok(RunOutcome {
            results,
            failures,
            workers,
        })
    }

    /// Для синхронного кода: поднимает current-thread runtime и выполняет `run_with`.
    /// Нельзя вызывать изнутри tokio runtime.
    pub fn run_blocking(&mut self, options: RunOptions<T, R, E>) -> PoolResult<Vec<Option<R>>, E> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PoolError::Runtime)?;
        rt.block_on(self.run_with(options))
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.snapshot()
    }

    /// Мониторинг метрик с callback
    /// ВАЖНО: Вызовите token.cancel() для остановки мониторинга
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let metrics = Arc::clone(&self.metrics);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(metrics.snapshot());
                    }
                    _ = token_clone.cancelled() => {
                        break;
                    }
                }
            }
        });

        token
    }

    pub fn stop_monitoring(token: CancellationToken) {
        token.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.worker_count, 1);
        assert!(!config.fail_silently);
        assert_eq!(config.join_timeout, Duration::from_secs(30));
        assert_eq!(config.queue_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn presets_scale_with_cpus() {
        assert_eq!(PoolConfig::cpu_bound().worker_count, num_cpus::get());
        assert_eq!(PoolConfig::io_bound().worker_count, num_cpus::get() * 2);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert_eq!(
            PoolConfig::default().with_worker_count(0).validate(),
            Err(ConfigError::ZeroWorkers)
        );
        assert_eq!(
            PoolConfig::default().with_join_timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroJoinTimeout)
        );
    }

    /// Итератор, который врёт о своей длине
    struct Liar(std::vec::IntoIter<u8>);

    impl Iterator for Liar {
        type Item = u8;
        fn next(&mut self) -> Option<u8> {
            self.0.next()
        }
    }

    impl ExactSizeIterator for Liar {
        fn len(&self) -> usize {
            self.0.len() + 2
        }
    }

    #[test]
    fn collect_exact_detects_length_mismatch() {
        assert_eq!(collect_exact(vec![1, 2, 3]), Ok(vec![1, 2, 3]));
        assert_eq!(
            collect_exact(Liar(vec![1, 2].into_iter())),
            Err(ConfigError::LengthMismatch { expected: 4, actual: 2 })
        );
    }
}
