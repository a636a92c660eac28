use std::future::Future;
use std::sync::Arc;
use futures_util::stream::FuturesUnordered;
use futures_util::TryStreamExt;
use tokio::sync::Semaphore;
use super::errors::{Result, UploadError};

/// 限制同时进行中的任务数
///
/// Each task holds a permit for as long as it runs; the permit is released
/// when the task's future finishes or is dropped.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 当前占用的名额
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// 获取名额后执行
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.semaphore
            .acquire()
            .await
            .map_err(|_| UploadError::internal_error("Concurrency limiter closed"))?;

        task.await
    }

    /// 按提交顺序排队执行所有任务，返回值按完成顺序排列
    ///
    /// The first error cancels every task still pending or in flight.
    pub async fn run_all<I, F, T>(&self, tasks: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T>>,
    {
        // 信号量是公平的，FuturesUnordered 按加入顺序首次 poll，所以按提交顺序拿到名额
        let running: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| self.run(task))
            .collect();

        running.try_collect().await
    }
}
