use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::Semaphore;
use tokio::task::spawn_blocking;
use tokio::time::timeout;

use super::error::{AppError, Result};
use crate::error::ClassifyError;
use crate::pipeline::{Budget, Classifier};

/// 应用状态
pub struct AppState {
    /// 训练和识别流程
    pub classifier: Classifier,
    /// 单个请求的超时时间，包含排队时间
    pub timeout: Duration,
    /// 限制同时运行的任务数量，许可随任务一起释放
    permits: Arc<Semaphore>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(classifier: Classifier, timeout: Duration) -> Self {
        Self::with_permits(classifier, timeout, num_cpus::get())
    }

    pub fn with_permits(classifier: Classifier, timeout: Duration, permits: usize) -> Self {
        AppState { classifier, timeout, permits: Arc::new(Semaphore::new(permits.max(1))) }
    }

    /// 在阻塞线程池中执行任务，超时后设置取消标记
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Classifier, &Budget) -> crate::Result<T> + Send + 'static,
    {
        let budget = Budget::with_timeout(self.timeout);
        let job = async {
            let permit = self.permits.clone().acquire_owned().await?;
            let classifier = self.classifier.clone();
            let budget = budget.clone();
            let value = spawn_blocking(move || {
                // 超时后任务仍在运行，许可要等它结束才归还
                let _permit = permit;
                f(&classifier, &budget)
            })
            .await??;
            Ok::<_, AppError>(value)
        };

        match timeout(self.timeout, job).await {
            Ok(result) => result,
            Err(_) => {
                warn!("请求超时，取消任务");
                budget.cancel();
                Err(ClassifyError::Timeout.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::extractor::tests::QuadrantExtractor;
    use crate::store::DescriptorStore;

    #[tokio::test(flavor = "multi_thread")]
    async fn permits_outlive_timed_out_requests() {
        let dir = tempfile::tempdir().unwrap();
        let store = DescriptorStore::open(dir.path()).unwrap();
        let classifier = Classifier::new(Arc::new(QuadrantExtractor::default()), store, 2);
        let state = Arc::new(AppState::with_permits(classifier, Duration::from_millis(50), 2));

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut requests = vec![];
        for _ in 0..8 {
            let (state, running, peak) = (state.clone(), running.clone(), peak.clone());
            requests.push(tokio::spawn(async move {
                state
                    .run_blocking(move |_, _| {
                        let n = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(n, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(300));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        for request in requests {
            assert!(request.await.unwrap().is_err());
        }
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}
