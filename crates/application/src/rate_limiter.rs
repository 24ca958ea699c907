use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use domain::UserId;

/// 用户在当前时间窗口内的请求配额
#[derive(Debug, Clone)]
struct UserQuota {
    request_count: u32,
    window_start: Instant,
}

impl UserQuota {
    fn new(now: Instant) -> Self {
        Self {
            request_count: 0,
            window_start: now,
        }
    }
}

/// 限流错误类型
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Too many request from this IP in 1 hour")]
    RateLimitExceeded { current: u32, max: u32 },
    #[error("rate limiter unavailable")]
    Unavailable,
}

/// 对话请求限流器，按用户统计固定时间窗口内的请求数。
pub struct RequestRateLimiter {
    /// 每个窗口最多的请求数，0 表示不限制
    max_requests: u32,
    window_duration: Duration,
    user_quotas: Arc<RwLock<HashMap<UserId, UserQuota>>>,
}

impl RequestRateLimiter {
    pub fn new(max_requests: u32, window_duration: Duration) -> Self {
        Self {
            max_requests,
            window_duration,
            user_quotas: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn per_hour(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60 * 60))
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_requests == 0
    }

    /// 记录一次请求；超过限制时返回错误且不计数。
    pub fn check(&self, user_id: UserId) -> Result<(), RateLimitError> {
        if self.is_unlimited() {
            return Ok(());
        }

        let mut quotas = self
            .user_quotas
            .write()
            .map_err(|_| RateLimitError::Unavailable)?;
        let now = Instant::now();
        let quota = quotas.entry(user_id).or_insert_with(|| UserQuota::new(now));

        if now.duration_since(quota.window_start) >= self.window_duration {
            *quota = UserQuota::new(now);
        }

        if quota.request_count >= self.max_requests {
            return Err(RateLimitError::RateLimitExceeded {
                current: quota.request_count,
                max: self.max_requests,
            });
        }

        quota.request_count += 1;
        Ok(())
    }

    /// 当前窗口内已记录的请求数
    pub fn current_count(&self, user_id: UserId) -> u32 {
        self.user_quotas
            .read()
            .ok()
            .and_then(|quotas| quotas.get(&user_id).map(|quota| quota.request_count))
            .unwrap_or(0)
    }

    /// 清理过期的配额记录
    pub fn cleanup_expired(&self) {
        if let Ok(mut quotas) = self.user_quotas.write() {
            let now = Instant::now();
            let window = self.window_duration;
            quotas.retain(|_, quota| now.duration_since(quota.window_start) < window);
        }
    }
}
