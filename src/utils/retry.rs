use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use crate::core::{Result, UploadConfig, UploadError};

/// 重试策略
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 计算第 n 次重试（从 0 开始）之前的延迟
    pub fn get_delay(&self, retry_count: u32) -> Duration {
        match self {
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(retry_count as f64);
                if !delay.is_finite() || delay >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(delay)
            }
        }
    }
}

/// 重试配置
pub struct RetryConfig {
    /// 首次尝试之后的最大重试次数
    pub max_retries: u32,
    /// 重试策略
    pub strategy: RetryStrategy,
    /// 是否重试的判断函数
    pub should_retry: Box<dyn Fn(&UploadError) -> bool + Send + Sync>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(10),
            },
            should_retry: Box::new(UploadError::is_retryable),
        }
    }
}

impl RetryConfig {
    /// 分片上传使用的重试配置
    pub fn for_parts(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_part_retries,
            strategy: RetryStrategy::Exponential {
                initial: config.retry_initial_delay,
                multiplier: 2.0,
                max_delay: config.retry_max_delay,
            },
            ..Default::default()
        }
    }
}

/// 执行带重试的操作
///
/// 不可重试的错误原样返回；重试次数用尽后返回 `RetryLimitExceeded`，其中带着最后一次的错误。
pub async fn retry_with_config<F, Fut, T>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry_count = 0;

    loop {
        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => error,
        };

        if !(config.should_retry)(&error) {
            return Err(error);
        }

        if retry_count >= config.max_retries {
            return Err(UploadError::RetryLimitExceeded {
                retries: retry_count,
                source: Box::new(error),
            });
        }

        let delay = config.strategy.get_delay(retry_count);
        tracing::warn!(
            retry = retry_count + 1,
            max_retries = config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "operation failed, retrying"
        );
        sleep(delay).await;
        retry_count += 1;
    }
}
