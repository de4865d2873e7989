/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Parse memoization.
//!
//! Parsing the same template or variable path repeatedly is common (the
//! same variable set gets applied to many templates, and every binder call
//! re-parses variable names), so both are memoized behind a
//! [`TemplateCache`]. Negative results are cached too: a source that failed
//! to parse stays failed until it expires, and a name that is not a pure
//! symbol is not re-tried on every lookup.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::ast::SymbolExpression;
use crate::error::{ParseDiagnostic, TemplateError, TemplateResult};
use crate::parser::{parse_path, ParseMode, Template};

/// A memoized outcome. Distinguishing `Absent` from "not cached yet" is
/// what lets `None` results be computed once.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<V> {
    Present(V),
    Absent,
}

struct Entry<V> {
    value: Cached<V>,
    deadline: Instant,
}

/// A mutex-guarded, insertion-ordered memo with sliding per-entry TTL and
/// an approximate capacity bound. Concurrent first computations of the same
/// key may race; the last insert wins, which is harmless because both
/// computed the same value.
pub struct MemoCache<K, V> {
    entries: Mutex<IndexMap<K, Entry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K: std::hash::Hash + Eq, V: Clone> MemoCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            capacity,
            ttl,
        }
    }

    /// `None` means not cached; a hit refreshes the entry's deadline.
    pub fn get(&self, key: &K) -> Option<Cached<V>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = entries.get(key)?.deadline < now;
        if expired {
            entries.shift_remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.deadline = now + self.ttl;
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: K, value: Cached<V>) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| entry.deadline >= now);
        entries.insert(
            key,
            Entry {
                value,
                deadline: now + self.ttl,
            },
        );
        while entries.len() > self.capacity {
            entries.shift_remove_index(0);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Default bounds for [`TemplateCache`].
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Shared memo for parsed templates and parsed variable paths.
pub struct TemplateCache {
    templates: MemoCache<(String, ParseMode), Result<Arc<Template>, ParseDiagnostic>>,
    paths: MemoCache<String, Arc<SymbolExpression>>,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

impl TemplateCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            templates: MemoCache::new(capacity, ttl),
            paths: MemoCache::new(capacity, ttl),
        }
    }

    /// Parse through the memo. Both successes and strict-mode failures are
    /// cached.
    pub fn template(&self, source: &str, mode: ParseMode) -> TemplateResult<Arc<Template>> {
        let key = (source.to_string(), mode);
        if let Some(Cached::Present(cached)) = self.templates.get(&key) {
            return cached.map_err(TemplateError::Parse);
        }
        match Template::parse_with_mode(source, mode) {
            Ok(template) => {
                let template = Arc::new(template);
                self.templates
                    .insert(key, Cached::Present(Ok(template.clone())));
                Ok(template)
            }
            Err(TemplateError::Parse(diag)) => {
                self.templates
                    .insert(key, Cached::Present(Err(diag.clone())));
                Err(TemplateError::Parse(diag))
            }
            Err(other) => Err(other),
        }
    }

    /// Parse a variable name as a path through the memo. Non-symbol names
    /// are remembered as absent.
    pub fn path(&self, source: &str) -> Option<Arc<SymbolExpression>> {
        match self.paths.get(&source.to_string()) {
            Some(Cached::Present(path)) => return Some(path),
            Some(Cached::Absent) => return None,
            None => {}
        }
        match parse_path(source) {
            Some(path) => {
                let path = Arc::new(path);
                self.paths
                    .insert(source.to_string(), Cached::Present(path.clone()));
                Some(path)
            }
            None => {
                self.paths.insert(source.to_string(), Cached::Absent);
                None
            }
        }
    }

    /// Number of memoized template parses (successes and failures).
    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn clear(&self) {
        self.templates.clear();
        self.paths.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_absent_is_distinct_from_uncached() {
        let memo: MemoCache<String, i32> = MemoCache::new(4, Duration::from_secs(60));
        assert_eq!(memo.get(&"k".to_string()), None);
        memo.insert("k".to_string(), Cached::Absent);
        assert_eq!(memo.get(&"k".to_string()), Some(Cached::Absent));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let memo: MemoCache<i32, i32> = MemoCache::new(2, Duration::from_secs(60));
        memo.insert(1, Cached::Present(1));
        memo.insert(2, Cached::Present(2));
        memo.insert(3, Cached::Present(3));
        assert_eq!(memo.get(&1), None);
        assert_eq!(memo.get(&2), Some(Cached::Present(2)));
        assert_eq!(memo.get(&3), Some(Cached::Present(3)));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let memo: MemoCache<i32, i32> = MemoCache::new(4, Duration::ZERO);
        memo.insert(1, Cached::Present(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(memo.get(&1), None);
    }

    #[test]
    fn test_clear() {
        let memo: MemoCache<i32, i32> = MemoCache::new(4, Duration::from_secs(60));
        memo.insert(1, Cached::Present(1));
        memo.clear();
        assert!(memo.is_empty());
    }

    #[test]
    fn test_template_memo_caches_failures() {
        let cache = TemplateCache::default();
        assert!(cache.template("#{if }", ParseMode::Strict).is_err());
        // Second call hits the cached diagnostic.
        assert!(cache.template("#{if }", ParseMode::Strict).is_err());
        assert!(cache.template("#{Foo}", ParseMode::Strict).is_ok());
    }

    #[test]
    fn test_template_memo_distinguishes_modes() {
        let cache = TemplateCache::default();
        assert!(cache.template("#{if }", ParseMode::Strict).is_err());
        assert!(cache.template("#{if }", ParseMode::Lenient).is_ok());
    }

    #[test]
    fn test_path_memo() {
        let cache = TemplateCache::default();
        assert!(cache.path("A.B[c]").is_some());
        assert!(cache.path("not|a|path").is_none());
        assert!(cache.path("not|a|path").is_none());
    }
}
