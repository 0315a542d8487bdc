//! 求值结果缓存
//!
//! 键空间 eval:{campaign}:{branch}:{fingerprint}，条目带 TTL。
//! 后端抽象为 trait：生产环境走 Redis（跨实例共享），单实例部署和
//! 测试走进程内存实现。两种实现使用同一键格式，作用域删除语义一致。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use campaign_shared::cache::{Cache, CacheKey};
use campaign_shared::error::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};

/// 缓存的求值结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEvaluation {
    pub value: Value,
    /// 求值时未能解析的变量路径
    pub unresolved: Vec<String>,
}

/// 结果缓存后端
#[async_trait]
pub trait ResultCacheBackend: Send + Sync {
    async fn get(
        &self,
        campaign_id: &str,
        branch_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CachedEvaluation>>;

    async fn set(
        &self,
        campaign_id: &str,
        branch_id: &str,
        fingerprint: &str,
        entry: &CachedEvaluation,
        ttl: Duration,
    ) -> Result<()>;

    /// 丢弃 (campaign, branch) 作用域内的全部结果，返回删除条数
    async fn remove_scope(&self, campaign_id: &str, branch_id: &str) -> Result<u64>;
}

/// 进程内存实现
///
/// 过期为惰性判定：读到过期条目时删除并按未命中处理。
pub struct MemoryResultCache {
    entries: DashMap<String, (CachedEvaluation, Instant)>,
    clock: Arc<dyn Clock>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCacheBackend for MemoryResultCache {
    async fn get(
        &self,
        campaign_id: &str,
        branch_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CachedEvaluation>> {
        let key = CacheKey::evaluation(campaign_id, branch_id, fingerprint);
        if let Some(slot) = self.entries.get(&key) {
            let (entry, deadline) = slot.value().clone();
            if self.clock.now() < deadline {
                return Ok(Some(entry));
            }
            drop(slot);
            self.entries.remove(&key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        campaign_id: &str,
        branch_id: &str,
        fingerprint: &str,
        entry: &CachedEvaluation,
        ttl: Duration,
    ) -> Result<()> {
        let key = CacheKey::evaluation(campaign_id, branch_id, fingerprint);
        self.entries
            .insert(key, (entry.clone(), self.clock.now() + ttl));
        Ok(())
    }

    async fn remove_scope(&self, campaign_id: &str, branch_id: &str) -> Result<u64> {
        let prefix = CacheKey::evaluation(campaign_id, branch_id, "");
        let mut removed = 0u64;
        self.entries.retain(|key, _| {
            if key.starts_with(&prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

/// Redis 实现，TTL 交给 Redis 管理
#[derive(Clone)]
pub struct RedisResultCache {
    cache: Cache,
}

impl RedisResultCache {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ResultCacheBackend for RedisResultCache {
    async fn get(
        &self,
        campaign_id: &str,
        branch_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CachedEvaluation>> {
        self.cache
            .get(&CacheKey::evaluation(campaign_id, branch_id, fingerprint))
            .await
    }

    async fn set(
        &self,
        campaign_id: &str,
        branch_id: &str,
        fingerprint: &str,
        entry: &CachedEvaluation,
        ttl: Duration,
    ) -> Result<()> {
        self.cache
            .set(
                &CacheKey::evaluation(campaign_id, branch_id, fingerprint),
                entry,
                ttl,
            )
            .await
    }

    async fn remove_scope(&self, campaign_id: &str, branch_id: &str) -> Result<u64> {
        self.cache
            .delete_pattern(&CacheKey::evaluation_scope(campaign_id, branch_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn entry(value: Value) -> CachedEvaluation {
        CachedEvaluation {
            value,
            unresolved: vec![],
        }
    }

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryResultCache::new();
        cache
            .set("c1", "b1", "fp1", &entry(json!(true)), Duration::from_secs(300))
            .await
            .unwrap();

        let hit = cache.get("c1", "b1", "fp1").await.unwrap().unwrap();
        assert_eq!(hit.value, json!(true));
        assert!(cache.get("c1", "b1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_ttl_expiry() {
        let clock = Arc::new(ManualClock::new());
        let cache = MemoryResultCache::with_clock(clock.clone());
        cache
            .set("c1", "b1", "fp1", &entry(json!(42)), Duration::from_secs(300))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(299));
        assert!(cache.get("c1", "b1", "fp1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(2));
        assert!(cache.get("c1", "b1", "fp1").await.unwrap().is_none());
        assert!(cache.is_empty(), "过期条目被惰性清除");
    }

    #[tokio::test]
    async fn test_memory_cache_scope_removal() {
        let cache = MemoryResultCache::new();
        let ttl = Duration::from_secs(300);
        cache.set("c1", "b1", "fp1", &entry(json!(1)), ttl).await.unwrap();
        cache.set("c1", "b1", "fp2", &entry(json!(2)), ttl).await.unwrap();
        cache.set("c1", "b2", "fp3", &entry(json!(3)), ttl).await.unwrap();

        let removed = cache.remove_scope("c1", "b1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("c1", "b1", "fp1").await.unwrap().is_none());
        // 其他分支作用域不受影响
        assert!(cache.get("c1", "b2", "fp3").await.unwrap().is_some());
    }
}
