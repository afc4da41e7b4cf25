//! Sliding-window limiter for login attempts
//!
//! Two independent windows guard the login endpoint: failed attempts per
//! account email (5 per 15 minutes) and raw requests per client IP
//! (10 per minute).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

const EMAIL_MAX_ATTEMPTS: usize = 5;
const EMAIL_WINDOW_MINUTES: i64 = 15;
const IP_MAX_REQUESTS: usize = 10;
const IP_WINDOW_MINUTES: i64 = 1;

struct Window<K> {
    hits: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
    limit: usize,
    span: Duration,
}

impl<K: Eq + Hash> Window<K> {
    fn new(limit: usize, span: Duration) -> Self {
        Self {
            hits: RwLock::new(HashMap::new()),
            limit,
            span,
        }
    }

    async fn is_limited(&self, key: &K) -> bool {
        let cutoff = Utc::now() - self.span;
        let hits = self.hits.read().await;
        hits.get(key)
            .map(|times| times.iter().filter(|t| **t > cutoff).count() >= self.limit)
            .unwrap_or(false)
    }

    async fn record(&self, key: K) {
        let now = Utc::now();
        let cutoff = now - self.span;
        let mut hits = self.hits.write().await;
        let times = hits.entry(key).or_default();
        times.retain(|t| *t > cutoff);
        times.push(now);
    }

    async fn forget(&self, key: &K) {
        self.hits.write().await.remove(key);
    }

    async fn prune(&self) {
        let cutoff = Utc::now() - self.span;
        let mut hits = self.hits.write().await;
        hits.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
    }

    async fn tracked(&self) -> usize {
        self.hits.read().await.len()
    }
}

pub struct LoginRateLimiter {
    by_email: Window<String>,
    by_ip: Window<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            by_email: Window::new(EMAIL_MAX_ATTEMPTS, Duration::minutes(EMAIL_WINDOW_MINUTES)),
            by_ip: Window::new(IP_MAX_REQUESTS, Duration::minutes(IP_WINDOW_MINUTES)),
        }
    }

    /// Whether the account has too many recent failed logins
    pub async fn is_email_limited(&self, email: &str) -> bool {
        self.by_email.is_limited(&normalize(email)).await
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.by_email.record(normalize(email)).await;
    }

    /// Reset the account window after a successful login
    pub async fn clear_email_attempts(&self, email: &str) {
        self.by_email.forget(&normalize(email)).await;
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.by_ip.is_limited(&ip).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.by_ip.record(ip).await;
    }

    /// Drop expired entries from both windows
    pub async fn cleanup(&self) {
        self.by_email.prune().await;
        self.by_ip.prune().await;
    }

    /// Number of emails and IPs currently tracked
    pub async fn tracked_keys(&self) -> (usize, usize) {
        (self.by_email.tracked().await, self.by_ip.tracked().await)
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}
