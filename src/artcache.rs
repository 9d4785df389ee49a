/*
 *  artcache.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Disk backed LRU for cover art, entries expire after a TTL
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::bitmap::{Bitmap, BitmapError};
use crate::guard;

pub const ART_TTL: Duration = Duration::from_secs(2 * 60 * 60);
pub const ART_CAPACITY: usize = 64;
pub const ART_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const CLEANUP_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache image: {0}")]
    Image(#[from] BitmapError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io { path: path.to_path_buf(), source }
}

#[derive(Debug)]
struct Node {
    key: String,
    expires: SystemTime,
    bytes: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab backed doubly linked list, head is least recent.
#[derive(Debug, Default)]
struct Lru {
    slab: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: HashMap<String, usize>,
    total: u64,
}

impl Lru {
    fn node(&self, i: usize) -> Option<&Node> {
        self.slab.get(i).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, i: usize) -> Option<&mut Node> {
        self.slab.get_mut(i).and_then(Option::as_mut)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn unlink(&mut self, i: usize) {
        let Some((prev, next)) = self.node(i).map(|n| (n.prev, n.next)) else {
            return;
        };
        match prev {
            Some(p) => if let Some(n) = self.node_mut(p) { n.next = next },
            None => self.head = next,
        }
        match next {
            Some(nx) => if let Some(n) = self.node_mut(nx) { n.prev = prev },
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(i) {
            n.prev = None;
            n.next = None;
        }
    }

    fn link_back(&mut self, i: usize) {
        let tail = self.tail;
        if let Some(n) = self.node_mut(i) {
            n.prev = tail;
            n.next = None;
        }
        match tail {
            Some(t) => if let Some(n) = self.node_mut(t) { n.next = Some(i) },
            None => self.head = Some(i),
        }
        self.tail = Some(i);
    }

    fn push_back(&mut self, key: &str, expires: SystemTime, bytes: u64) -> usize {
        let node = Node { key: key.to_string(), expires, bytes, prev: None, next: None };
        let i = match self.free.pop() {
            Some(i) => {
                self.slab[i] = Some(node);
                i
            }
            None => {
                self.slab.push(Some(node));
                self.slab.len() - 1
            }
        };
        self.index.insert(key.to_string(), i);
        self.total += bytes;
        self.link_back(i);
        i
    }

    fn move_to_back(&mut self, i: usize) {
        if self.tail != Some(i) {
            self.unlink(i);
            self.link_back(i);
        }
    }

    fn remove(&mut self, i: usize) -> Option<Node> {
        self.unlink(i);
        let node = self.slab.get_mut(i)?.take()?;
        self.free.push(i);
        self.index.remove(&node.key);
        self.total -= node.bytes;
        Some(node)
    }
}

/// Cover art keyed by LMS cover id, one file per key under `base`.
#[derive(Debug)]
pub struct ArtCache {
    base: PathBuf,
    ttl: Duration,
    capacity: usize,
    max_bytes: u64,
    lru: Mutex<Lru>,
}

impl ArtCache {
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::with_limits(base, ART_TTL, ART_CAPACITY, ART_MAX_BYTES)
    }

    pub fn with_limits(
        base: impl Into<PathBuf>,
        ttl: Duration,
        capacity: usize,
        max_bytes: u64,
    ) -> Result<Self, CacheError> {
        let base = base.into();
        fs::create_dir_all(&base).map_err(io_err(&base))?;
        Ok(Self {
            base,
            ttl,
            capacity: capacity.max(1),
            max_bytes,
            lru: Mutex::new(Lru::default()),
        })
    }

    pub fn len(&self) -> usize {
        guard::lock(&self.lru).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        guard::lock(&self.lru).total
    }

    pub fn contains(&self, key: &str) -> bool {
        guard::lock(&self.lru).index.contains_key(key)
    }

    /// Cover ids are opaque: hex keeps file names tame and one per key.
    fn file_name(key: &str) -> String {
        key.bytes().fold(String::from("cover-"), |mut name, b| {
            name.push_str(&format!("{b:02x}"));
            name
        })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(Self::file_name(key))
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.get_at(key, SystemTime::now())
    }

    pub fn set(&self, key: &str, data: &[u8]) -> Result<(), CacheError> {
        self.set_at(key, data, SystemTime::now())
    }

    pub fn get_image(&self, key: &str) -> Option<Bitmap> {
        let data = self.get(key)?;
        match Bitmap::decode_png(&data) {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("cover {key} unreadable: {e}");
                None
            }
        }
    }

    pub fn set_image(&self, key: &str, image: &Bitmap) -> Result<(), CacheError> {
        let data = image.encode_png()?;
        self.set(key, &data)
    }

    pub(crate) fn get_at(&self, key: &str, now: SystemTime) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        let mut lru = guard::lock(&self.lru);
        match lru.index.get(key).copied() {
            Some(i) => {
                let expired = lru.node(i).is_some_and(|n| n.expires <= now);
                if expired {
                    debug!("cover {key} expired");
                    self.evict(&mut lru, i);
                    self.evict_expired(&mut lru, now);
                    return None;
                }
                lru.move_to_back(i);
            }
            None => {
                // file left by an earlier run
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                let expires = modified + self.ttl;
                if expires <= now {
                    return None;
                }
                let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let me = lru.push_back(key, expires, bytes);
                self.evict_expired(&mut lru, now);
                self.trim(&mut lru, me);
            }
        }
        drop(lru);
        fs::read(&path).ok()
    }

    pub(crate) fn set_at(&self, key: &str, data: &[u8], now: SystemTime) -> Result<(), CacheError> {
        let path = self.path_for(key);
        fs::write(&path, data).map_err(io_err(&path))?;

        let mut lru = guard::lock(&self.lru);
        let expires = now + self.ttl;
        let bytes = data.len() as u64;
        let me = match lru.index.get(key).copied() {
            Some(i) => {
                let old = lru.node(i).map_or(0, |n| n.bytes);
                lru.total = lru.total - old + bytes;
                if let Some(n) = lru.node_mut(i) {
                    n.expires = expires;
                    n.bytes = bytes;
                }
                lru.move_to_back(i);
                i
            }
            None => lru.push_back(key, expires, bytes),
        };

        self.evict_expired(&mut lru, now);
        self.trim(&mut lru, me);
        Ok(())
    }

    /// Evict from the front until both budgets hold, sparing `keep`.
    fn trim(&self, lru: &mut Lru, keep: usize) {
        while lru.len() > self.capacity || lru.total > self.max_bytes {
            match lru.head {
                Some(front) if front != keep => self.evict(lru, front),
                _ => break,
            }
        }
    }

    fn evict(&self, lru: &mut Lru, i: usize) {
        if let Some(node) = lru.remove(i) {
            let path = self.path_for(&node.key);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("cover {} not erased: {}", node.key, e);
                }
            }
        }
    }

    fn evict_expired(&self, lru: &mut Lru, now: SystemTime) {
        while let Some(front) = lru.head {
            if lru.node(front).is_some_and(|n| n.expires <= now) {
                self.evict(lru, front);
            } else {
                break;
            }
        }
    }

    /// Startup sweep of the cache directory.
    pub fn cleanup(&self) -> Result<usize, CacheError> {
        self.cleanup_at(SystemTime::now(), CLEANUP_AGE)
    }

    pub(crate) fn cleanup_at(&self, now: SystemTime, max_age: Duration) -> Result<usize, CacheError> {
        let entries = fs::read_dir(&self.base).map_err(io_err(&self.base))?;
        let known: HashSet<String> = guard::lock(&self.lru).index.keys().map(|k| Self::file_name(k)).collect();
        let mut removed = 0;
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            let name = entry.file_name().to_string_lossy().into_owned();
            let orphan = !known.contains(&name) && age >= self.ttl;
            if age >= max_age || orphan {
                let path = entry.path();
                fs::remove_file(&path).map_err(io_err(&path))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("art cache cleanup removed {} files from {}", removed, self.base.display());
        }
        Ok(removed)
    }
}
