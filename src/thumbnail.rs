//! Byte-budgeted thumbnail cache.
//!
//! Handles are produced elsewhere and are opaque here; the cache only tracks
//! their size and recency. Evicting an entry drops the cache's handle.

use crate::config::Settings;
use crate::model::FileIdentity;
use log::debug;
use lru::LruCache;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailKey {
    pub identity: FileIdentity,
    pub width: u32,
    pub height: u32,
}

/// Result of [`ThumbnailCache::put`]. A handle too large for the whole budget
/// is handed back to the caller untouched.
#[derive(Debug)]
pub enum Admission<H> {
    Stored,
    Rejected(H),
}

#[derive(Debug)]
struct Cached<H> {
    handle: H,
    size_bytes: usize,
}

#[derive(Debug)]
struct CacheInner<H> {
    entries: LruCache<ThumbnailKey, Cached<H>>,
    used_bytes: usize,
}

impl<H> CacheInner<H> {
    fn evict_until(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.used_bytes > limit {
            let Some((key, cached)) = self.entries.pop_lru() else {
                break;
            };
            self.used_bytes -= cached.size_bytes;
            evicted += 1;
            debug!(
                "evicted {}x{} thumbnail for {}",
                key.width,
                key.height,
                key.identity.path().display()
            );
        }
        evicted
    }
}

#[derive(Debug)]
pub struct ThumbnailCache<H> {
    inner: Mutex<CacheInner<H>>,
    budget_bytes: usize,
}

impl<H: Clone> ThumbnailCache<H> {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
            budget_bytes,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.thumbnail_budget_bytes)
    }

    /// A hit also marks the entry as most recently used.
    pub fn get(&self, identity: &FileIdentity, width: u32, height: u32) -> Option<H> {
        let key = ThumbnailKey {
            identity: identity.clone(),
            width,
            height,
        };
        self.lock()
            .entries
            .get(&key)
            .map(|cached| cached.handle.clone())
    }

    pub fn put(
        &self,
        identity: FileIdentity,
        width: u32,
        height: u32,
        handle: H,
        size_bytes: usize,
    ) -> Admission<H> {
        let key = ThumbnailKey {
            identity,
            width,
            height,
        };
        let mut inner = self.lock();

        if size_bytes > self.budget_bytes {
            debug!(
                "thumbnail of {size_bytes} bytes exceeds budget of {} bytes",
                self.budget_bytes
            );
            if let Some(previous) = inner.entries.pop(&key) {
                inner.used_bytes -= previous.size_bytes;
            }
            return Admission::Rejected(handle);
        }

        if let Some(previous) = inner.entries.pop(&key) {
            inner.used_bytes -= previous.size_bytes;
        }
        inner.evict_until(self.budget_bytes - size_bytes);
        inner.entries.put(key, Cached { handle, size_bytes });
        inner.used_bytes += size_bytes;
        Admission::Stored
    }

    /// Evicts least recently used entries until at most `target_bytes` remain.
    /// Returns how many entries were dropped.
    pub fn trim_to(&self, target_bytes: usize) -> usize {
        self.lock().evict_until(target_bytes)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.used_bytes = 0;
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// How many RGB565 thumbnails of this size fit in the budget at once.
    pub fn capacity_for(&self, width: u32, height: u32) -> usize {
        match rgb565_size_bytes(width, height) {
            0 => 0,
            size => self.budget_bytes / size,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<H>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decoded size of a 16-bit-per-pixel (RGB565) bitmap.
pub fn rgb565_size_bytes(width: u32, height: u32) -> usize {
    width as usize * height as usize * 2
}
