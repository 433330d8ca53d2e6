//! Пул воркеров фиксированного размера для параллельного map по конечной коллекции
//!
//! # Features
//! - Результаты в порядке входа, независимо от порядка завершения
//! - Ошибки и паники функции обработки перехватываются по каждому элементу
//! - Строгий (`run`) и нестрогий (`run_outcome`) режимы, флаг `fail_silently`
//! - Ожидание воркеров с таймаутом
//! - Подменяемый цикл воркера (`WorkerStrategy`)
//! - Метрики и мониторинг

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod queue;
pub mod result;
pub mod worker;

pub use errors::{ConfigError, PoolError, TaskError};
pub use model::{FailureRecord, PoolMetrics, Processor, Task};
pub use pool::{PoolConfig, RunOptions, ThreadHandler};
pub use result::{PoolResult, RunOutcome};
pub use worker::{DrainQueue, Worker, WorkerReport, WorkerStrategy};
