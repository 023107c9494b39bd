//! Process-local cache backend.

use super::{BackendInfo, CacheBackend, CacheError};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How long an unfinished scan keeps its snapshot.
const SCAN_SNAPSHOT_TTL: Duration = Duration::from_secs(60);

struct Entry {
    value: String,
    expires_at: Instant,
}

struct ScanSnapshot {
    keys: Vec<String>,
    opened_at: Instant,
}

/// In-process TTL map speaking the same contract as Redis.
///
/// Scans iterate over a snapshot taken when the cursor is opened, so keys
/// deleted between pages never cause others to be skipped. Snapshots of
/// scans nobody finishes are dropped after a minute.
///
/// `set_unavailable(true)` makes every call fail, which is how outages are
/// simulated in tests.
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
    scans: Mutex<HashMap<u64, ScanSnapshot>>,
    scan_ttl: Duration,
    next_cursor: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            scans: Mutex::new(HashMap::new()),
            scan_ttl: SCAN_SNAPSHOT_TTL,
            next_cursor: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("memory backend switched off".into()))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    fn with_scan_ttl(mut self, ttl: Duration) -> Self {
        self.scan_ttl = ttl;
        self
    }

    #[cfg(test)]
    fn open_scans(&self) -> usize {
        self.scans.lock().len()
    }

    fn purge_stale_scans(&self) {
        let ttl = self.scan_ttl;
        self.scans.lock().retain(|_, scan| scan.opened_at.elapsed() < ttl);
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
    }
}

/// Translate a Redis glob into an anchored regex.
///
/// Supports `*`, `?`, `\x` escapes and `[...]` classes with `^` negation and
/// `a-z` ranges, as Redis `SCAN MATCH` does.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => re.push_str(&regex::escape("\\")),
            },
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                while let Some(member) = chars.next() {
                    match member {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '-' => re.push('-'),
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                re.push_str(&regex::escape(&escaped.to_string()));
                            }
                        }
                        other => re.push_str(&regex::escape(&other.to_string())),
                    }
                }
                if !closed {
                    return Err(CacheError::Config(format!("unterminated class in '{pattern}'")));
                }
                re.push(']');
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| CacheError::Config(format!("bad pattern '{pattern}': {e}")))
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), CacheError> {
        self.check()?;

        let mut pending = if cursor == 0 {
            self.purge_stale_scans();
            let matcher = glob_to_regex(pattern)?;
            let mut entries = self.entries.lock();
            Self::purge_expired(&mut entries);
            let mut keys: Vec<String> = entries
                .keys()
                .filter(|k| matcher.is_match(k))
                .cloned()
                .collect();
            keys.sort();
            keys
        } else {
            self.scans
                .lock()
                .remove(&cursor)
                .map(|scan| scan.keys)
                .ok_or_else(|| CacheError::Backend(format!("unknown scan cursor {cursor}")))?
        };

        let count = count.max(1);
        let rest = if pending.len() > count {
            pending.split_off(count)
        } else {
            Vec::new()
        };

        if rest.is_empty() {
            return Ok((0, pending));
        }

        let next = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        self.scans.lock().insert(
            next,
            ScanSnapshot {
                keys: rest,
                opened_at: Instant::now(),
            },
        );
        Ok((next, pending))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count() as u64)
    }

    async fn info(&self) -> Result<BackendInfo, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries);
        Ok(BackendInfo {
            key_count: entries.len() as u64,
            memory_used: None,
        })
    }
}
