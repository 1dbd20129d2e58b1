//! Fixed-ttl in-process set, used for update deduplication.

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

const PRUNE_EVERY: usize = 1024;

/// A concurrent set whose members expire after a fixed ttl.
///
/// [`insert`](TtlCache::insert) doubles as the membership test: it returns
/// `false` when a live entry already exists, which is exactly the
/// "have we seen this update recently" check the dedup middleware needs.
///
/// Expired members are invisible to reads. Their memory is reclaimed
/// opportunistically every `PRUNE_EVERY` inserts, or eagerly via
/// [`prune`](TtlCache::prune).
pub struct TtlCache<K> {
    entries: DashMap<K, Instant>,
    ttl: Duration,
    inserts: AtomicUsize,
}

impl<K: Eq + Hash + Clone> TtlCache<K> {
    /// Creates a cache whose members expire `ttl` after insertion.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            inserts: AtomicUsize::new(0),
        }
    }

    /// Inserts `key`, returning `false` if a live entry was already present.
    /// An expired entry is replaced as if absent.
    pub fn insert(&self, key: K) -> bool {
        let now = Instant::now();
        let fresh = match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    false
                } else {
                    occupied.insert(now + self.ttl);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now + self.ttl);
                true
            }
        };
        if self.inserts.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
        fresh
    }

    /// Returns `true` if a live entry exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    /// Number of physically present entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are physically present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, deadline| *deadline > now);
        before.saturating_sub(self.entries.len())
    }
}
