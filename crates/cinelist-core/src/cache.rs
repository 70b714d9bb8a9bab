//! Two-tier query cache for read endpoints.
//!
//! **L1** – [`DashMap`] in-memory map keyed by query key.
//! **L2** – Optional SQLite database on disk (persists across restarts).
//!
//! Entries are JSON bodies. An entry younger than the stale time is served
//! without touching the network. Older entries are refetched; if the refetch
//! fails they are still served until the cache time runs out.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::gateway::ApiError;

/// Entries younger than this are served without refetching: 5 minutes.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Entries older than this are dropped entirely: 24 hours.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Extra attempts after a transient fetch failure.
pub const DEFAULT_RETRY: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open cache database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

#[derive(Clone, Debug)]
struct CacheEntry {
    body: String,
    fetched_at: Instant,
}

fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS query_cache (
                 key        TEXT PRIMARY KEY,
                 body       TEXT NOT NULL,
                 fetched_at INTEGER NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    fn insert(&self, key: &str, body: &str, epoch: u64) {
        let _ = self.conn.execute(
            "INSERT OR REPLACE INTO query_cache (key, body, fetched_at) VALUES (?1, ?2, ?3)",
            params![key, body, epoch],
        );
    }

    fn remove(&self, key: &str) -> usize {
        self.conn
            .execute("DELETE FROM query_cache WHERE key = ?1", params![key])
            .unwrap_or(0)
    }

    fn remove_prefix(&self, prefix: &str) -> usize {
        self.conn
            .execute(
                "DELETE FROM query_cache WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )
            .unwrap_or(0)
    }

    fn clear(&self) {
        let _ = self.conn.execute("DELETE FROM query_cache", []);
        let _ = self.conn.execute_batch("VACUUM");
    }

    fn evict_expired(&self, cache_time: Duration) -> usize {
        let cutoff = now_epoch().saturating_sub(cache_time.as_secs());
        self.conn
            .execute(
                "DELETE FROM query_cache WHERE fetched_at < ?1",
                params![cutoff],
            )
            .unwrap_or(0)
    }

    fn count(&self) -> usize {
        self.conn
            .query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))
            .unwrap_or(0)
    }
}

/// Pool of read-only SQLite connections for concurrent L2 lookups.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn acquire(&self) -> Option<Connection> {
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Some(conn);
        }
        open_sqlite(&self.path, true).ok()
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }

    fn get(&self, key: &str) -> Option<(String, u64)> {
        let conn = self.acquire()?;
        let result = conn
            .prepare_cached("SELECT body, fetched_at FROM query_cache WHERE key = ?1")
            .ok()
            .and_then(|mut stmt| {
                stmt.query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                    .ok()
            });
        self.release(conn);
        result
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Map a wall-clock epoch onto the monotonic clock.
fn epoch_to_instant(epoch: u64) -> Option<Instant> {
    let age = Duration::from_secs(now_epoch().saturating_sub(epoch));
    Instant::now().checked_sub(age)
}

/// Backoff before retry `attempt` (0-based): doubling from 1s, capped at
/// 30s, with up to 250ms of jitter.
fn retry_delay(attempt: u32) -> Duration {
    let base = 1000u64.saturating_mul(1 << attempt.min(5)).min(30_000);
    Duration::from_millis(base + fastrand::u64(0..250))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub disk_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failures: u64,
    pub persistent: bool,
}

pub struct QueryCache {
    entries: DashMap<String, CacheEntry>,
    sqlite_writer: Option<Mutex<SqliteWriter>>,
    read_pool: Option<ReadPool>,
    stale_time: Duration,
    cache_time: Duration,
    retry: u32,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
    l2_count: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_TIME, DEFAULT_CACHE_TIME)
    }
}

impl QueryCache {
    /// In-memory cache with no disk persistence.
    pub fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sqlite_writer: None,
            read_pool: None,
            stale_time,
            cache_time,
            retry: DEFAULT_RETRY,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            l2_count: AtomicU64::new(0),
        }
    }

    /// Persistent cache backed by SQLite at `path`. Entries past the cache
    /// time are evicted on open.
    pub fn open(path: &Path, stale_time: Duration, cache_time: Duration) -> Result<Self, CacheError> {
        let writer = SqliteWriter::open(path).map_err(|source| CacheError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let evicted = writer.evict_expired(cache_time);
        let count = writer.count();
        tracing::debug!(path = %path.display(), entries = count, evicted, "query cache opened");
        Ok(Self {
            sqlite_writer: Some(Mutex::new(writer)),
            read_pool: Some(ReadPool::new(path)),
            l2_count: AtomicU64::new(count as u64),
            ..Self::new(stale_time, cache_time)
        })
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Body and age of the entry for `key`, if it is within the cache time.
    fn lookup(&self, key: &str) -> Option<(String, Duration)> {
        if let Some(entry) = self.entries.get(key) {
            let age = entry.fetched_at.elapsed();
            if age <= self.cache_time {
                return Some((entry.body.clone(), age));
            }
            drop(entry);
            self.entries.remove(key);
        }

        if let Some(ref pool) = self.read_pool
            && let Some((body, epoch)) = pool.get(key)
            && let Some(fetched_at) = epoch_to_instant(epoch)
        {
            let age = fetched_at.elapsed();
            if age <= self.cache_time {
                tracing::trace!(key, "cache L2 hit, promoting to L1");
                self.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        body: body.clone(),
                        fetched_at,
                    },
                );
                return Some((body, age));
            }
        }
        None
    }

    /// A fresh (not yet stale) cached value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let fresh = self
            .lookup(key)
            .filter(|(_, age)| *age <= self.stale_time)
            .and_then(|(body, _)| serde_json::from_str(&body).ok());
        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "cache miss");
        }
        fresh
    }

    /// A cached value regardless of staleness, as long as it is within the
    /// cache time.
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key)
            .and_then(|(body, _)| serde_json::from_str(&body).ok())
    }

    /// Write-through insert into both tiers.
    pub fn insert<T: Serialize>(&self, key: &str, value: &T) {
        let Ok(body) = serde_json::to_string(value) else {
            return;
        };
        let epoch = now_epoch();

        if let Some(ref sqlite_mutex) = self.sqlite_writer
            && let Ok(store) = sqlite_mutex.lock()
        {
            store.insert(key, &body, epoch);
            self.l2_count.store(store.count() as u64, Ordering::Relaxed);
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                body,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Serve `key` from cache when fresh, otherwise run `fetcher`.
    ///
    /// Transient failures are retried up to the configured retry count. If
    /// every attempt fails and a stale entry exists, the stale entry is
    /// returned instead of the error.
    pub async fn fetch<T, F, Fut>(&self, key: &str, mut fetcher: F) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let mut attempt = 0;
        loop {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            match fetcher().await {
                Ok(value) => {
                    self.insert(key, &value);
                    return Ok(value);
                }
                Err(e) if attempt < self.retry && e.is_transient() => {
                    let delay = retry_delay(attempt);
                    tracing::debug!(key, attempt, error = %e, delay_ms = delay.as_millis() as u64, "retrying query");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    if let Some(stale) = self.get_stale(key) {
                        tracing::warn!(key, error = %e, "query failed, serving stale entry");
                        return Ok(stale);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Drop one key from both tiers.
    pub fn invalidate(&self, key: &str) -> bool {
        let in_l1 = self.entries.remove(key).is_some();
        let in_l2 = match self.sqlite_writer {
            Some(ref sqlite_mutex) => match sqlite_mutex.lock() {
                Ok(store) => {
                    let removed = store.remove(key);
                    self.l2_count.store(store.count() as u64, Ordering::Relaxed);
                    removed > 0
                }
                Err(_) => false,
            },
            None => false,
        };
        in_l1 || in_l2
    }

    /// Drop every key starting with `prefix`. Returns the number of L1
    /// entries removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if let Some(ref sqlite_mutex) = self.sqlite_writer
            && let Ok(store) = sqlite_mutex.lock()
        {
            store.remove_prefix(prefix);
            self.l2_count.store(store.count() as u64, Ordering::Relaxed);
        }
        tracing::trace!(prefix, removed, "cache invalidated");
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        if let Some(ref sqlite_mutex) = self.sqlite_writer
            && let Ok(store) = sqlite_mutex.lock()
        {
            store.clear();
        }
        self.l2_count.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn disk_len(&self) -> usize {
        self.l2_count.load(Ordering::Relaxed) as usize
    }

    pub fn has_persistence(&self) -> bool {
        self.sqlite_writer.is_some()
    }

    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            disk_entries: self.disk_len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            persistent: self.has_persistence(),
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("l1_entries", &self.entries.len())
            .field("l2_entries", &self.disk_len())
            .field("stale_time", &self.stale_time)
            .field("cache_time", &self.cache_time)
            .field("retry", &self.retry)
            .field("persistent", &self.has_persistence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn miss_on_empty() {
        let cache = QueryCache::default();
        assert!(cache.get::<u32>("movie:1").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn hit_after_insert() {
        let cache = QueryCache::default();
        cache.insert("movie:550", &vec!["Fight Club".to_string()]);
        let cached: Vec<String> = cache.get("movie:550").unwrap();
        assert_eq!(cached, vec!["Fight Club"]);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn stale_entry_is_not_fresh_but_still_available() {
        let cache = QueryCache::new(Duration::ZERO, DEFAULT_CACHE_TIME);
        cache.insert("movie:1", &1u32);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get::<u32>("movie:1").is_none());
        assert_eq!(cache.get_stale::<u32>("movie:1"), Some(1));
    }

    #[tokio::test]
    async fn fetch_serves_fresh_entry_without_calling_fetcher() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .fetch("trending", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7u32) }
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_retries_transient_failure_once() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let value = cache
            .fetch("popular", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ApiError::Timeout)
                    } else {
                        Ok(3u32)
                    }
                }
            })
            .await;
        assert_eq!(value, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_gives_up_after_retry_budget() {
        let cache = QueryCache::default().with_retry(1);
        let calls = AtomicUsize::new(0);
        let result: Result<u32, _> = cache
            .fetch("popular", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::Network("reset".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn fetch_does_not_retry_not_found() {
        let cache = QueryCache::default();
        let calls = AtomicUsize::new(0);
        let result: Result<u32, _> = cache
            .fetch("movie:0", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ApiError::NotFound {
                        message: String::new(),
                    })
                }
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_falls_back_to_stale_entry() {
        let cache = QueryCache::new(Duration::ZERO, DEFAULT_CACHE_TIME).with_retry(0);
        cache.insert("movie:1", &"old".to_string());
        std::thread::sleep(Duration::from_millis(5));
        let value: String = cache
            .fetch("movie:1", || async { Err(ApiError::Timeout) })
            .await
            .unwrap();
        assert_eq!(value, "old");
    }

    #[test]
    fn invalidate_prefix_only_touches_matching_keys() {
        let cache = QueryCache::default();
        cache.insert("movie:1:credits", &1u32);
        cache.insert("movie:1:videos", &2u32);
        cache.insert("person:1", &3u32);
        assert_eq!(cache.invalidate_prefix("movie:1"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("person:1"));
        assert!(!cache.invalidate("person:1"));
    }

    // ── SQLite persistence ────────────────────────────────────────────

    #[test]
    fn sqlite_survives_reopen_and_promotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let cache = QueryCache::open(&path, DEFAULT_STALE_TIME, DEFAULT_CACHE_TIME).unwrap();
        cache.insert("movie:550", &"Fight Club".to_string());
        assert_eq!(cache.disk_len(), 1);
        drop(cache);

        let reopened = QueryCache::open(&path, DEFAULT_STALE_TIME, DEFAULT_CACHE_TIME).unwrap();
        assert!(reopened.is_empty());
        assert_eq!(reopened.disk_len(), 1);
        let title: String = reopened.get("movie:550").unwrap();
        assert_eq!(title, "Fight Club");
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn sqlite_invalidate_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let cache = QueryCache::open(&path, DEFAULT_STALE_TIME, DEFAULT_CACHE_TIME).unwrap();
        cache.insert("search:alien:1", &1u32);
        cache.insert("search:aliens:1", &2u32);
        cache.insert("movie:1", &3u32);

        cache.invalidate_prefix("search:");
        assert_eq!(cache.disk_len(), 1);

        cache.clear();
        assert_eq!(cache.disk_len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn sqlite_expired_evicted_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache =
                QueryCache::open(&path, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            cache.insert("movie:1", &1u32);
        }
        std::thread::sleep(Duration::from_secs(2));
        let reopened =
            QueryCache::open(&path, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
        assert_eq!(reopened.disk_len(), 0);
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        assert!(retry_delay(0) >= Duration::from_secs(1));
        assert!(retry_delay(1) >= Duration::from_secs(2));
        assert!(retry_delay(10) < Duration::from_millis(30_250));
    }
}
