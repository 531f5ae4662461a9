use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::AttachmentRef;
use thiserror::Error;

use crate::clock::Clock;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment write failed: {0}")]
    Write(String),
}

impl AttachmentError {
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write(message.into())
    }
}

/// 附件二进制存储
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn write(&self, name: &AttachmentRef, bytes: Vec<u8>) -> Result<(), AttachmentError>;
}

/// 附件存储名生成器
///
/// 以毫秒时间戳为令牌；同一毫秒内的多次调用依次递增，保证同一进程内不重名。
pub struct AttachmentNamer {
    clock: Arc<dyn Clock>,
    last_token: AtomicI64,
}

impl AttachmentNamer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_token: AtomicI64::new(i64::MIN),
        }
    }

    pub fn next(&self, extension: Option<&str>) -> AttachmentRef {
        let now = self.clock.now().timestamp_millis();
        let previous = self
            .last_token
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        let token = now.max(previous.saturating_add(1));
        AttachmentRef::from_token(token, extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    #[test]
    fn names_within_same_millisecond_do_not_collide() {
        let clock = FixedClock(chrono::Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        let namer = AttachmentNamer::new(Arc::new(clock));

        let first = namer.next(Some("png"));
        let second = namer.next(Some("png"));
        let third = namer.next(None);

        assert_eq!(first.as_str(), "1700000000000.png");
        assert_eq!(second.as_str(), "1700000000001.png");
        assert_eq!(third.as_str(), "1700000000002");
    }
}
