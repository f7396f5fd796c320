//! Watched address cache
//!
//! In-memory set of relevant addresses shared by every worker. Each entry
//! carries a flag marking structural indexes (token and pool registries) whose
//! add/remove events mutate the cache itself.
//!
//! Strategy:
//! - Bootstrap seeds the watchlist, then the indexes, then strips the blacklist
//! - Index handlers add and remove entries while blocks are being processed
//! - Noisy high-volume tokens only count when a counterparty is also watched

use alloy_primitives::Address;
use dashmap::DashMap;

/// Concurrent cache of relevant addresses.
///
/// Maps addresses to whether they are watchable indexes (true) or plain
/// watchlist members (false).
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: DashMap<Address, bool>,
}

impl AddressCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from the configured lists.
    ///
    /// Blacklisted addresses are removed last so they win over both lists.
    pub fn bootstrap(watchlist: &[Address], indexes: &[Address], blacklist: &[Address]) -> Self {
        let cache = Self::new();
        for address in watchlist {
            cache.add(*address);
        }
        for address in indexes {
            cache.add_index(*address);
        }
        for address in blacklist {
            cache.remove(address);
        }
        tracing::info!(cached_addresses = cache.len(), "cache bootstrap complete");
        cache
    }

    pub fn exists(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    /// True when `contract` is relevant and at least one of `a`, `b` is too.
    pub fn exists_either_of(&self, contract: &Address, a: &Address, b: &Address) -> bool {
        self.exists(contract) && (self.exists(a) || self.exists(b))
    }

    /// Add a plain watchlist entry. Existing index flags are kept.
    pub fn add(&self, address: Address) {
        self.entries.entry(address).or_insert(false);
    }

    /// Add (or promote) an entry to a watchable index.
    pub fn add_index(&self, address: Address) {
        self.entries.insert(address, true);
    }

    pub fn remove(&self, address: &Address) {
        self.entries.remove(address);
    }

    pub fn is_watchable_index(&self, address: &Address) -> bool {
        self.entries.get(address).map(|e| *e.value()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::sync::Arc;

    #[test]
    fn test_cache_operations() {
        let cache = AddressCache::new();
        let addr1 = address!("0000000000000000000000000000000000000001");
        let addr2 = address!("0000000000000000000000000000000000000002");

        // Initially not cached
        assert!(!cache.exists(&addr1));

        cache.add(addr1);
        cache.add_index(addr2);
        assert!(cache.exists(&addr1));
        assert!(!cache.is_watchable_index(&addr1));
        assert!(cache.is_watchable_index(&addr2));

        // Re-adding as plain keeps the index flag
        cache.add(addr2);
        assert!(cache.is_watchable_index(&addr2));

        cache.remove(&addr1);
        assert!(!cache.exists(&addr1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_bootstrap_blacklist_wins() {
        let token = address!("00000000000000000000000000000000000000a1");
        let index = address!("00000000000000000000000000000000000000a2");
        let banned = address!("00000000000000000000000000000000000000a3");

        let cache = AddressCache::bootstrap(&[token, banned], &[index, banned], &[banned]);
        assert_eq!(cache.len(), 2);
        assert!(cache.exists(&token));
        assert!(cache.is_watchable_index(&index));
        assert!(!cache.exists(&banned));
    }

    #[test]
    fn test_exists_either_of() {
        let token = address!("00000000000000000000000000000000000000b1");
        let member = address!("00000000000000000000000000000000000000b2");
        let stranger = address!("00000000000000000000000000000000000000b3");
        let cache = AddressCache::bootstrap(&[token, member], &[], &[]);

        assert!(cache.exists_either_of(&token, &member, &stranger));
        assert!(cache.exists_either_of(&token, &stranger, &member));
        assert!(!cache.exists_either_of(&token, &stranger, &stranger));
        // Contract itself must be relevant
        assert!(!cache.exists_either_of(&stranger, &member, &member));
    }

    #[test]
    fn test_concurrent_mutation() {
        let cache = Arc::new(AddressCache::new());
        let handles: Vec<_> = (0..4u8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50u8 {
                        let mut raw = [0u8; 20];
                        raw[18] = t;
                        raw[19] = i;
                        cache.add(Address::from(raw));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 200);
    }
}
