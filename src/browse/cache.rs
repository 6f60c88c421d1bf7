//! Sticky listing cache
//!
//! Last-known-good entries per normalized path. Entries are only ever replaced
//! by a newer confirmed result for the same path; nothing expires.

use std::collections::HashMap;

use super::types::DirectoryEntry;

#[derive(Debug, Clone)]
struct CachedListing {
    entries: Vec<DirectoryEntry>,
    /// Issue sequence of the transport call that produced the entries
    sequence: u64,
}

/// Which fallback tier served a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    ExactPath,
    LastBrowsed,
    LastSuccessful,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// Path the entries belong to
    pub path: String,
    pub entries: Vec<DirectoryEntry>,
    pub tier: CacheTier,
}

#[derive(Debug, Default)]
pub struct ListingCache {
    listings: HashMap<String, CachedListing>,
    empty_strikes: HashMap<String, u32>,
    last_successful: Option<(String, CachedListing)>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a confirmed listing. Returns false when a newer result is already cached.
    pub fn store(&mut self, path: &str, entries: Vec<DirectoryEntry>, sequence: u64) -> bool {
        if let Some(existing) = self.listings.get(path) {
            if existing.sequence > sequence {
                return false;
            }
        }

        let listing = CachedListing { entries, sequence };
        let newer_than_last = self
            .last_successful
            .as_ref()
            .map(|(_, last)| last.sequence <= sequence)
            .unwrap_or(true);
        if newer_than_last {
            self.last_successful = Some((path.to_string(), listing.clone()));
        }
        self.listings.insert(path.to_string(), listing);
        self.empty_strikes.remove(path);
        true
    }

    pub fn get(&self, path: &str) -> Option<&[DirectoryEntry]> {
        self.listings.get(path).map(|l| l.entries.as_slice())
    }

    pub fn has_entries(&self, path: &str) -> bool {
        self.get(path).map(|e| !e.is_empty()).unwrap_or(false)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.listings.contains_key(path)
    }

    /// Three-tier lookup: exact path, then last browsed path, then the most
    /// recent successful listing anywhere.
    pub fn fallback(&self, path: &str, last_browsed: Option<&str>) -> Option<CacheHit> {
        if let Some(listing) = self.listings.get(path) {
            return Some(CacheHit {
                path: path.to_string(),
                entries: listing.entries.clone(),
                tier: CacheTier::ExactPath,
            });
        }

        if let Some(last) = last_browsed.filter(|p| *p != path) {
            if let Some(listing) = self.listings.get(last) {
                return Some(CacheHit {
                    path: last.to_string(),
                    entries: listing.entries.clone(),
                    tier: CacheTier::LastBrowsed,
                });
            }
        }

        self.last_successful.as_ref().map(|(p, listing)| CacheHit {
            path: p.clone(),
            entries: listing.entries.clone(),
            tier: CacheTier::LastSuccessful,
        })
    }

    /// Count an unconfirmed empty result. Returns the new strike count.
    pub fn add_empty_strike(&mut self, path: &str) -> u32 {
        let strikes = self.empty_strikes.entry(path.to_string()).or_insert(0);
        *strikes += 1;
        *strikes
    }

    pub fn empty_strikes(&self, path: &str) -> u32 {
        self.empty_strikes.get(path).copied().unwrap_or(0)
    }

    pub fn total_empty_strikes(&self) -> u32 {
        self.empty_strikes.values().sum()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str], parent: &str) -> Vec<DirectoryEntry> {
        names
            .iter()
            .map(|n| DirectoryEntry::directory(*n, format!("{}/{}", parent, n)))
            .collect()
    }

    #[test]
    fn test_fallback_tiers() {
        let mut cache = ListingCache::new();
        assert!(cache.fallback("/data", None).is_none());

        cache.store("/home", entries(&["alice"], "/home"), 1);
        cache.store("/srv", entries(&["www"], "/srv"), 2);

        let exact = cache.fallback("/home", Some("/srv")).unwrap();
        assert_eq!(exact.tier, CacheTier::ExactPath);
        assert_eq!(exact.path, "/home");

        let browsed = cache.fallback("/data", Some("/home")).unwrap();
        assert_eq!(browsed.tier, CacheTier::LastBrowsed);
        assert_eq!(browsed.entries[0].name, "alice");

        let anywhere = cache.fallback("/data", Some("/data")).unwrap();
        assert_eq!(anywhere.tier, CacheTier::LastSuccessful);
        assert_eq!(anywhere.path, "/srv");
    }

    #[test]
    fn test_older_result_never_overwrites_newer() {
        let mut cache = ListingCache::new();
        assert!(cache.store("/data", entries(&["new"], "/data"), 5));
        assert!(!cache.store("/data", entries(&["old"], "/data"), 3));
        assert_eq!(cache.get("/data").unwrap()[0].name, "new");

        // Last-successful is not regressed by the rejected write either
        let hit = cache.fallback("/other", None).unwrap();
        assert_eq!(hit.entries[0].name, "new");
    }

    #[test]
    fn test_strikes_reset_on_store() {
        let mut cache = ListingCache::new();
        cache.store("/data", entries(&["foo"], "/data"), 1);
        assert_eq!(cache.add_empty_strike("/data"), 1);
        assert_eq!(cache.add_empty_strike("/data"), 2);
        cache.add_empty_strike("/logs");
        assert_eq!(cache.total_empty_strikes(), 3);

        cache.store("/data", entries(&["foo", "bar"], "/data"), 2);
        assert_eq!(cache.empty_strikes("/data"), 0);
        assert_eq!(cache.total_empty_strikes(), 1);
    }

    #[test]
    fn test_confirmed_empty_is_cached() {
        let mut cache = ListingCache::new();
        cache.store("/empty", Vec::new(), 1);
        assert!(cache.contains("/empty"));
        assert!(!cache.has_entries("/empty"));
    }
}
