//! 评测结果的缓存
//!
//! 以配置的指纹为键，容量有限，写入后经过 TTL 过期；超出容量时淘汰最久未使用的条目。
//! 多个会话共享同一个缓存，不按会话隔离。

use super::EvaluationResult;
use crate::candidate::Fingerprint;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    result: EvaluationResult,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct EvaluationCache {
    // LruCache 的 get 也要调整顺序，所以读也需要独占
    entries: Mutex<LruCache<Fingerprint, Entry>>,
    ttl: Duration,
}

impl EvaluationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    // 缓存里只有完整写入的条目，锁中毒时内容依然可用
    fn entries(&self) -> MutexGuard<'_, LruCache<Fingerprint, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<EvaluationResult> {
        let mut entries = self.entries();
        let entry = entries.get(fingerprint)?;
        if Instant::now() >= entry.expires_at {
            entries.pop(fingerprint);
            return None;
        }
        Some(entry.result.clone())
    }

    pub fn store(&self, fingerprint: Fingerprint, result: EvaluationResult) {
        let expires_at = Instant::now() + self.ttl;
        self.entries().put(fingerprint, Entry { result, expires_at });
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
