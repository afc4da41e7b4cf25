//! In-process cache backed by moka
//!
//! Values are stored as JSON so one cache instance can hold the department
//! list, course lists and exam-name lists side by side. Every entry carries
//! its own time-to-live, capped by the configured default.

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MAX_CAPACITY: u64 = 10_000;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct CacheEntry {
    json: Arc<String>,
    ttl: Duration,
}

impl CacheEntry {
    fn encode<T: Serialize>(value: &T, ttl: Duration) -> Result<Self> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        Ok(Self {
            json: Arc::new(json),
            ttl,
        })
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.json).context("Failed to deserialize cache value")
    }
}

/// Expiry policy that reads the TTL stored on each entry
struct EntryTtl;

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct MemoryCache {
    inner: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.inner.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_CAPACITY, DEFAULT_TTL)
    }

    /// Build a cache holding at most `max_capacity` entries.
    ///
    /// `default_ttl` is both the TTL used for a zero duration and the upper
    /// bound for any TTL passed to [`CacheLayer::set`].
    pub fn with_capacity_and_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();

        Self { inner, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Approximate entry count. Pending maintenance may lag behind writes.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    fn effective_ttl(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            self.default_ttl
        } else {
            requested.min(self.default_ttl)
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match where `*` spans any run of characters and `?` exactly one.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    // Position of the last `*` seen and the key index it was tried against
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, k));
                p += 1;
            }
            Some(&c) if c == '?' || c == key[k] => {
                p += 1;
                k += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    k = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[async_trait]
impl CacheLayer for MemoryCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key).await {
            Some(entry) => Ok(Some(entry.decode()?)),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::encode(value, self.effective_ttl(ttl))?;
        self.inner.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let matching: Vec<String> = self
            .inner
            .iter()
            .filter(|(key, _)| glob_match(pattern, key.as_str()))
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in &matching {
            self.inner.invalidate(key).await;
        }
        tracing::trace!("Cache invalidated {} keys for {}", matching.len(), pattern);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct DepartmentSummary {
        id: i64,
        code: String,
    }

    #[tokio::test]
    async fn test_set_then_get_struct() {
        let cache = MemoryCache::new();
        let value = vec![
            DepartmentSummary { id: 1, code: "CS".into() },
            DepartmentSummary { id: 2, code: "EE".into() },
        ];
        cache
            .set("taxonomy:departments:active", &value, Duration::from_secs(60))
            .await
            .unwrap();

        let cached: Option<Vec<DepartmentSummary>> =
            cache.get("taxonomy:departments:active").await.unwrap();
        assert_eq!(cached, Some(value));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = MemoryCache::new();
        let cached: Option<String> = cache.get("taxonomy:nothing").await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_wrong_type_is_error() {
        let cache = MemoryCache::new();
        cache.set("k", &"text", Duration::from_secs(60)).await.unwrap();
        let result: Result<Option<i64>> = cache.get("k").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = MemoryCache::new();
        cache.set("k", &1_i64, Duration::from_secs(60)).await.unwrap();
        cache.set("k", &2_i64, Duration::from_secs(60)).await.unwrap();
        let cached: Option<i64> = cache.get("k").await.unwrap();
        assert_eq!(cached, Some(2));
    }

    #[tokio::test]
    async fn test_entry_expires_after_its_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("short", &"v", Duration::from_millis(50))
            .await
            .unwrap();
        cache
            .set("long", &"v", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        let short: Option<String> = cache.get("short").await.unwrap();
        let long: Option<String> = cache.get("long").await.unwrap();
        assert!(short.is_none());
        assert_eq!(long.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_default_ttl_caps_requested_ttl() {
        let cache = MemoryCache::with_capacity_and_ttl(100, Duration::from_millis(50));
        cache
            .set("k", &"v", Duration::from_secs(3600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let cached: Option<String> = cache.get("k").await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_delete_single_key() {
        let cache = MemoryCache::new();
        cache.set("a", &1_i64, Duration::from_secs(60)).await.unwrap();
        cache.delete("a").await.unwrap();
        cache.delete("never-set").await.unwrap();
        let cached: Option<i64> = cache.get("a").await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_delete_pattern_only_touches_matching_keys() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("taxonomy:departments:all", &1_i64, ttl).await.unwrap();
        cache.set("taxonomy:departments:active", &2_i64, ttl).await.unwrap();
        cache.set("taxonomy:courses:all", &3_i64, ttl).await.unwrap();

        cache.delete_pattern("taxonomy:departments:*").await.unwrap();

        let all: Option<i64> = cache.get("taxonomy:departments:all").await.unwrap();
        let active: Option<i64> = cache.get("taxonomy:departments:active").await.unwrap();
        let courses: Option<i64> = cache.get("taxonomy:courses:all").await.unwrap();
        assert!(all.is_none());
        assert!(active.is_none());
        assert_eq!(courses, Some(3));
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let cache = MemoryCache::new();
        for i in 0..10 {
            cache
                .set(&format!("taxonomy:courses:dept:{}", i), &i, Duration::from_secs(60))
                .await
                .unwrap();
        }
        cache.clear().await.unwrap();
        for i in 0..10 {
            let cached: Option<i32> = cache
                .get(&format!("taxonomy:courses:dept:{}", i))
                .await
                .unwrap();
            assert!(cached.is_none());
        }
    }

    #[test]
    fn test_glob_match_cases() {
        assert!(glob_match("taxonomy:*", "taxonomy:departments:all"));
        assert!(glob_match("taxonomy:courses:dept:?", "taxonomy:courses:dept:7"));
        assert!(!glob_match("taxonomy:courses:dept:?", "taxonomy:courses:dept:17"));
        assert!(glob_match("*:all", "taxonomy:exam_names:all"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("", "x"));
        assert!(glob_match("exact", "exact"));
    }

    proptest! {
        #[test]
        fn prop_key_matches_itself(key in "[a-z:_0-9]{0,30}") {
            prop_assert!(glob_match(&key, &key));
        }

        #[test]
        fn prop_prefix_star_matches(prefix in "[a-z:]{0,12}", rest in "[a-z0-9:]{0,12}") {
            let pattern = format!("{}*", prefix);
            let key = format!("{}{}", prefix, rest);
            prop_assert!(glob_match(&pattern, &key));
        }

        #[test]
        fn prop_question_marks_match_length(key in "[a-z0-9]{0,16}") {
            let pattern = "?".repeat(key.chars().count());
            prop_assert!(glob_match(&pattern, &key));
            let longer = format!("{}?", pattern);
            prop_assert!(!glob_match(&longer, &key));
        }
    }
}
