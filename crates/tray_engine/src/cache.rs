//! A bounded LRU cache of rendered icons.
//!
//! Entries live in a dense arena and are linked into a recency list by index. The head is the
//! most recently used entry, the tail is the next one to be evicted. An eviction always frees
//! exactly one slot which the new entry immediately takes over, so the arena never has holes.

use std::{
    collections::HashMap,
    rc::{Rc, Weak},
};

use crate::{
    icon::{decode_icon_file, IconResolver},
    surface::{Surface, SurfaceRef},
};

/// Extensions stripped from a name before it is used as a key.
const KEY_EXTENSIONS: &[&str] = &["png", "svg", "svgz", "xpm", "jpg", "jpeg", "ico", "icon", "bmp", "gif"];

/// Produces surfaces on a cache miss.
pub trait IconLoader {
    /// Load `name` (an icon name or a path) rasterized to fit `px × px`.
    fn load(&mut self, name: &str, px: i32) -> Option<Surface>;
}

impl<F> IconLoader for F
where
    F: FnMut(&str, i32) -> Option<Surface>,
{
    fn load(&mut self, name: &str, px: i32) -> Option<Surface> {
        self(name, px)
    }
}

/// Loads icons from disk through an [`IconResolver`].
#[derive(Debug, Clone, Default)]
pub struct FileIconLoader {
    pub resolver: IconResolver,
}

impl IconLoader for FileIconLoader {
    fn load(&mut self, name: &str, px: i32) -> Option<Surface> {
        let path = self.resolver.best_icon_path(name)?;
        match decode_icon_file(&path, px) {
            Ok(surface) => Some(surface),
            Err(e) => {
                log::debug!("failed to decode icon {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Reduce an icon name or path to its cache identity.
///
/// Surrounding whitespace is trimmed, only the last path segment is kept, known image
/// extensions are stripped and the rest is lowercased. Applying it twice changes nothing.
pub fn normalize_icon_key(name: &str) -> String {
    let name = name.trim();
    let mut name = match name.rfind('/') {
        Some(slash) if !name.ends_with('/') => &name[slash + 1..],
        _ => name,
    };
    while let Some(dot) = name.rfind('.').filter(|&dot| dot > 0) {
        let ext = &name[dot + 1..];
        if !KEY_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)) {
            break;
        }
        name = &name[..dot];
    }
    name.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub px: i32,
    pub scale: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Surfaces handed out by the cache that still exist somewhere, cached or not.
    pub alive_surfaces: usize,
    pub size: usize,
    pub capacity: usize,
    pub icon_px: i32,
    pub scale: i32,
}

#[derive(Debug)]
struct Entry {
    key: CacheKey,
    surface: SurfaceRef,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct IconCache<L = FileIconLoader> {
    entries: Vec<Entry>,
    index: HashMap<CacheKey, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    issued: Vec<Weak<Surface>>,

    capacity: usize,
    icon_px: i32,
    scale: i32,
    hits: u64,
    misses: u64,
    evictions: u64,

    loader: L,
}

impl<L: std::fmt::Debug> std::fmt::Debug for IconCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconCache").field("stats", &self.stats()).field("loader", &self.loader).finish()
    }
}

impl<L> IconCache<L> {
    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            alive_surfaces: self.issued.iter().filter(|weak| weak.strong_count() > 0).count(),
            size: self.entries.len(),
            capacity: self.capacity,
            icon_px: self.icon_px,
            scale: self.scale,
        }
    }
}

impl<L: IconLoader> IconCache<L> {
    pub fn new(capacity: usize, icon_px: i32, scale: i32, loader: L) -> Self {
        IconCache {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
            issued: Vec::new(),
            capacity,
            icon_px,
            scale: scale.max(1),
            hits: 0,
            misses: 0,
            evictions: 0,
            loader,
        }
    }

    /// Look up `name`, loading and inserting it on a miss.
    ///
    /// Returns `None` if the icon can't be resolved or decoded; failed loads are not cached.
    pub fn get(&mut self, name: &str) -> Option<SurfaceRef> {
        let key = self.key_for(name);
        if let Some(&idx) = self.index.get(&key) {
            self.hits += 1;
            self.touch(idx);
            return Some(self.entries[idx].surface.clone());
        }

        self.misses += 1;
        let surface = Rc::new(self.loader.load(name, self.icon_px * self.scale)?);
        self.issued.retain(|weak| weak.strong_count() > 0);
        self.issued.push(Rc::downgrade(&surface));
        if self.capacity == 0 {
            return Some(surface);
        }
        self.insert(key, surface.clone());
        Some(surface)
    }

    /// Whether `name` is cached, without touching recency or counters.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&self.key_for(name))
    }

    fn key_for(&self, name: &str) -> CacheKey {
        CacheKey { name: normalize_icon_key(name), px: self.icon_px, scale: self.scale }
    }

    fn insert(&mut self, key: CacheKey, surface: SurfaceRef) {
        let entry = Entry { key: key.clone(), surface, prev: None, next: None };
        let idx = match self.tail {
            Some(tail) if self.entries.len() >= self.capacity => {
                self.unlink(tail);
                let evicted = std::mem::replace(&mut self.entries[tail], entry);
                self.index.remove(&evicted.key);
                self.evictions += 1;
                log::debug!("evicted icon {:?}", evicted.key.name);
                tail
            }
            _ => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        match prev {
            Some(prev) => self.entries[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entries[next].prev = prev,
            None => self.tail = prev,
        }
        self.entries[idx].prev = None;
        self.entries[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.entries[idx].next = self.head;
        self.entries[idx].prev = None;
        if let Some(head) = self.head {
            self.entries[head].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Cached names from most to least recently used.
    #[cfg(test)]
    fn recency(&self) -> Vec<String> {
        std::iter::successors(self.head, |&idx| self.entries[idx].next)
            .map(|idx| self.entries[idx].key.name.clone())
            .collect()
    }
}
