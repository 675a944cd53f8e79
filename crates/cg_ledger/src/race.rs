//! 主存储调用与本地降级之间的竞速

use std::future::Future;
use std::time::Duration;

use cg_core::ChatGateError;

/// 主存储调用的固定截止时间
pub const PRIMARY_STORE_DEADLINE: Duration = Duration::from_millis(500);

/// 降级原因
#[derive(Debug)]
pub enum FallbackCause {
    /// 主存储在截止时间内未返回
    TimedOut(Duration),
    /// 主存储返回错误
    Failed(ChatGateError),
}

/// 竞速结果
#[derive(Debug)]
pub enum Race<T> {
    Primary(T),
    Fallback { value: T, cause: FallbackCause },
}

impl<T> Race<T> {
    pub fn into_value(self) -> T {
        match self {
            Race::Primary(value) | Race::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Race::Fallback { .. })
    }
}

/// 主存储调用与截止计时器二选一，先到者胜
///
/// 计时器先到或主调用失败时，才会求值降级答案。
pub async fn first_of<T, F, G>(primary: F, deadline: Duration, fallback: G) -> Race<T>
where
    F: Future<Output = cg_core::Result<T>>,
    G: FnOnce() -> T,
{
    tokio::select! {
        biased;
        result = primary => match result {
            Ok(value) => Race::Primary(value),
            Err(err) => Race::Fallback {
                value: fallback(),
                cause: FallbackCause::Failed(err),
            },
        },
        _ = tokio::time::sleep(deadline) => Race::Fallback {
            value: fallback(),
            cause: FallbackCause::TimedOut(deadline),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn primary_wins_when_fast() {
        let race = first_of(async { Ok(7) }, PRIMARY_STORE_DEADLINE, || 1).await;
        assert!(!race.is_fallback());
        assert_eq!(race.into_value(), 7);
    }

    #[tokio::test]
    async fn error_falls_through() {
        let race = first_of(
            async { Err(ChatGateError::Store("down".to_string())) },
            PRIMARY_STORE_DEADLINE,
            || 1,
        )
        .await;
        assert!(matches!(
            race,
            Race::Fallback {
                value: 1,
                cause: FallbackCause::Failed(_)
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_beats_slow_primary() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(7)
        };
        let race = first_of(slow, PRIMARY_STORE_DEADLINE, || 1).await;
        assert!(matches!(
            race,
            Race::Fallback {
                value: 1,
                cause: FallbackCause::TimedOut(_)
            }
        ));
    }
}
