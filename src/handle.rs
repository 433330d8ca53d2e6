use super::{
    errors::PoolError,
    result::PoolResult,
    worker::WorkerReport,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{
    sync::oneshot,
    time::Duration,
};


/// Handle на поток воркера: ожидание его отчёта, в том числе с timeout.
///
/// Если воркер не уложился в timeout, поток не убивается, его просто перестают ждать.
pub struct WorkerHandle<T, E> {
    worker: usize,
    receiver: oneshot::Receiver<WorkerReport<T, E>>,
}

impl<T, E> WorkerHandle<T, E> {

    pub fn new
    (
        worker: usize,
        receiver: oneshot::Receiver<WorkerReport<T, E>>,
    ) -> Self {
        Self {
            worker,
            receiver,
        }
    }

    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub async fn await_timeout(self, timeout: Duration) -> PoolResult<WorkerReport<T, E>, E> {
        let worker = self.worker;
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) => Err(PoolError::WorkerLost { worker }),
            Err(_) => {
                tracing::error!(worker, ?timeout, "worker did not finish in time, detaching it");
                Err(PoolError::WorkerTimeout { worker, timeout })
            }
        }
    }
}

impl<T, E> Future for WorkerHandle<T, E> {
    type Output = PoolResult<WorkerReport<T, E>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let worker = this.worker;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.map_err(|_| PoolError::WorkerLost { worker })),
            Poll::Pending => Poll::Pending,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_worker_times_out() {
        let (_tx, rx) = oneshot::channel::<WorkerReport<u8, String>>();
        let handle = WorkerHandle::new(1, rx);

        match handle.await_timeout(Duration::from_millis(20)).await {
            Err(PoolError::WorkerTimeout { worker, timeout }) => {
                assert_eq!(worker, 1);
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {:?}", other.map(|r| r.worker)),
        }
    }

    #[tokio::test]
    async fn dropped_sender_is_lost_worker() {
        let (tx, rx) = oneshot::channel::<WorkerReport<u8, String>>();
        drop(tx);

        let res = WorkerHandle::new(4, rx).await;
        assert!(matches!(res, Err(PoolError::WorkerLost { worker: 4 })));
    }

    #[tokio::test]
    async fn report_is_delivered() {
        let (tx, rx) = oneshot::channel::<WorkerReport<u8, String>>();
        tx.send(WorkerReport { worker: 2, processed: 7, failures: Vec::new() }).unwrap();

        let report = WorkerHandle::new(2, rx).await_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.processed, 7);
    }
}
