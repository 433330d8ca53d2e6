use super::model::Task;
use crossbeam::{
    deque::{Injector, Steal},
    utils::Backoff,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::Notify,
    time::Duration,
};


/// FIFO очередь задач с подсчётом незавершённых задач (`put` минус `mark_done`).
///
/// Единственная структура, которой нужна синхронизация между потоками:
/// каждая задача отдаётся ровно одному потребителю.
pub struct WorkQueue<T> {
    inject: Injector<Task<T>>,
    unfinished: AtomicUsize,
    all_done: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inject: Injector::new(),
            unfinished: AtomicUsize::new(0),
            all_done: Notify::new(),
        }
    }

    #[inline]
    pub fn put(&self, task: Task<T>) {
        self.unfinished.fetch_add(1, Ordering::AcqRel);
        self.inject.push(task);
    }

    /// Проверка на пустоту и извлечение за одну операцию.
    /// `Steal::Retry` повторяется, поэтому конкурентный доступ не выглядит как пустая очередь.
    pub fn try_get(&self) -> Option<Task<T>> {
        loop {
            match self.inject.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// Блокирующее извлечение: ждёт, пока в очереди не появится задача
    pub fn get(&self) -> Task<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(task) = self.try_get() {
                return task;
            }
            backoff.snooze();
        }
    }

    pub fn mark_done(&self) {
        let prev = self
            .unfinished
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match prev {
            Ok(1) => self.all_done.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::error!("mark_done called more times than tasks were put"),
        }
    }

    pub async fn join(&self) {
        loop {
            // Notified создаётся до проверки счётчика, иначе notify_waiters может потеряться
            let notified = self.all_done.notified();
            if self.unfinished.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub async fn join_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.join()).await.is_ok()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inject.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inject.len()
    }

    #[inline]
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashSet,
        sync::{Arc, Mutex},
        thread,
    };

    #[test]
    fn fifo_order_and_counts() {
        let queue = WorkQueue::new();
        for i in 0..3 {
            queue.put(Task::new(i, i * 10));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.unfinished(), 3);

        assert_eq!(queue.try_get(), Some(Task::new(0, 0)));
        assert_eq!(queue.get(), Task::new(1, 10));
        assert_eq!(queue.try_get(), Some(Task::new(2, 20)));
        assert!(queue.is_empty());
        assert_eq!(queue.try_get(), None);

        // Извлечение не завершает задачу
        assert_eq!(queue.unfinished(), 3);
        queue.mark_done();
        assert_eq!(queue.unfinished(), 2);
    }

    #[test]
    fn extra_mark_done_saturates() {
        let queue: WorkQueue<()> = WorkQueue::new();
        queue.mark_done();
        assert_eq!(queue.unfinished(), 0);
    }

    #[test]
    fn concurrent_consumers_see_each_task_once() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..1_000 {
            queue.put(Task::new(i, ()));
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    while let Some(task) = queue.try_get() {
                        seen.lock().unwrap().push(task.index);
                        queue.mark_done();
                    }
                })
            })
            .collect();

        for c in consumers {
            c.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1_000);
        assert_eq!(seen.iter().copied().collect::<HashSet<_>>().len(), 1_000);
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn join_waits_for_all_mark_done() {
        let queue = Arc::new(WorkQueue::new());
        for i in 0..10 {
            queue.put(Task::new(i, i));
        }

        assert!(!queue.join_timeout(Duration::from_millis(20)).await);

        let worker = {
            let queue = queue.clone();
            thread::spawn(move || {
                while let Some(_task) = queue.try_get() {
                    thread::sleep(std::time::Duration::from_millis(1));
                    queue.mark_done();
                }
            })
        };

        assert!(queue.join_timeout(Duration::from_secs(5)).await);
        assert_eq!(queue.unfinished(), 0);
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn join_on_empty_queue_returns_immediately() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        assert!(queue.join_timeout(Duration::from_millis(10)).await);
    }
}
