//! ProgressStore trait and RocksDB implementation
//!
//! Persists the coverage bounds and one presence marker per processed block.
//! Uses RocksDB with column families to keep bounds and markers apart, so a
//! range scan over markers never has to skip meta keys.

use crate::keys::{
    decode_block_key, encode_block_key, encode_meta_key, META_LOWER_BOUND, META_UPPER_BOUND,
};
use crate::missing::MissingBlocks;
use crate::records::{decode_u64, encode_u64, BlockMarker};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;

/// Trait defining the interface for block progress tracking.
///
/// Storage errors are returned to the caller and never retried here.
/// Implementations must be safe to share across worker tasks.
pub trait ProgressStore: Send + Sync {
    /// Set the oldest block number coverage is guaranteed from.
    fn set_lower_bound(&self, block: u64) -> Result<()>;

    /// Get the lower bound, `None` before bootstrap.
    fn get_lower_bound(&self) -> Result<Option<u64>>;

    /// Overwrite the upper bound.
    fn set_upper_bound(&self, block: u64) -> Result<()>;

    /// Get the upper bound, `None` before bootstrap.
    fn get_upper_bound(&self) -> Result<Option<u64>>;

    /// Raise the upper bound to `block` if it is higher than the stored one.
    ///
    /// Returns the bound in effect after the call.
    fn advance_upper_bound(&self, block: u64) -> Result<u64>;

    /// Record that `block` was fully processed. Idempotent.
    fn mark_processed(&self, block: u64) -> Result<()>;

    /// Get the presence marker for a block, if any.
    fn get_marker(&self, block: u64) -> Result<Option<BlockMarker>>;

    /// Bit-vector of block numbers in `[lo, hi]` without a presence marker.
    fn missing_between(&self, lo: u64, hi: u64) -> Result<MissingBlocks>;

    /// Delete presence markers strictly below `lower - 1`.
    ///
    /// Returns the number of markers removed.
    fn compact(&self) -> Result<u64>;
}

const CF_META: &str = "meta";
const CF_BLOCKS: &str = "blocks";

/// RocksDB-backed implementation of ProgressStore.
///
/// Column families:
/// - meta: lower and upper bounds
/// - blocks: presence markers keyed by big-endian block number
pub struct RocksProgressStore {
    db: DB,
    /// Serializes read-modify-write updates of the upper bound.
    upper_lock: Mutex<()>,
}

impl RocksProgressStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self {
            db,
            upper_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn get_meta(&self, meta_id: u8) -> Result<Option<u64>> {
        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(meta_id);
        match self.db.get_cf(cf, &key).context("Failed to get bound")? {
            Some(bytes) => Ok(Some(decode_u64(&bytes).context("Corrupt bound value")?)),
            None => Ok(None),
        }
    }

    fn put_meta(&self, meta_id: u8, value: u64) -> Result<()> {
        let cf = self.get_cf(CF_META)?;
        let key = encode_meta_key(meta_id);
        self.db
            .put_cf(cf, &key, encode_u64(value))
            .context("Failed to put bound")?;
        Ok(())
    }
}

impl ProgressStore for RocksProgressStore {
    fn set_lower_bound(&self, block: u64) -> Result<()> {
        self.put_meta(META_LOWER_BOUND, block)
    }

    fn get_lower_bound(&self) -> Result<Option<u64>> {
        self.get_meta(META_LOWER_BOUND)
    }

    fn set_upper_bound(&self, block: u64) -> Result<()> {
        let _guard = self.upper_lock.lock();
        self.put_meta(META_UPPER_BOUND, block)
    }

    fn get_upper_bound(&self) -> Result<Option<u64>> {
        self.get_meta(META_UPPER_BOUND)
    }

    fn advance_upper_bound(&self, block: u64) -> Result<u64> {
        let _guard = self.upper_lock.lock();
        match self.get_meta(META_UPPER_BOUND)? {
            Some(current) if current >= block => Ok(current),
            _ => {
                self.put_meta(META_UPPER_BOUND, block)?;
                Ok(block)
            }
        }
    }

    fn mark_processed(&self, block: u64) -> Result<()> {
        let cf = self.get_cf(CF_BLOCKS)?;
        let key = encode_block_key(block);
        let value = postcard::to_allocvec(&BlockMarker::now())
            .context("Failed to serialize block marker")?;
        self.db
            .put_cf(cf, &key, &value)
            .with_context(|| format!("Failed to mark block {} processed", block))?;
        Ok(())
    }

    fn get_marker(&self, block: u64) -> Result<Option<BlockMarker>> {
        let cf = self.get_cf(CF_BLOCKS)?;
        let key = encode_block_key(block);
        match self.db.get_cf(cf, &key).context("Failed to get block marker")? {
            Some(bytes) => {
                let marker = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize block marker")?;
                Ok(Some(marker))
            }
            None => Ok(None),
        }
    }

    fn missing_between(&self, lo: u64, hi: u64) -> Result<MissingBlocks> {
        let mut missing = MissingBlocks::all_missing(lo, hi)?;
        if lo > hi {
            return Ok(missing);
        }

        let cf = self.get_cf(CF_BLOCKS)?;
        let snapshot = self.db.snapshot();
        let start = encode_block_key(lo);
        let iter = snapshot.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        for item in iter {
            let (key, _) = item.context("Failed to scan block markers")?;
            let block = decode_block_key(&key)?;
            if block > hi {
                break;
            }
            missing.clear(block);
        }

        Ok(missing)
    }

    fn compact(&self) -> Result<u64> {
        // Threshold is fixed before the sweep; markers written concurrently at
        // or above it are never touched.
        let lower = match self.get_lower_bound()? {
            Some(lower) => lower,
            None => return Ok(0),
        };
        let threshold = lower.saturating_sub(1);

        let cf = self.get_cf(CF_BLOCKS)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.context("Failed to scan block markers")?;
            if decode_block_key(&key)? >= threshold {
                break;
            }
            batch.delete_cf(cf, &key);
            removed += 1;
        }

        if removed > 0 {
            self.db
                .write(batch)
                .context("Failed to delete compacted block markers")?;
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksProgressStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksProgressStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_bounds_set_get() {
        let (store, _temp_dir) = create_test_store();

        // Initially should be None
        assert_eq!(store.get_lower_bound().unwrap(), None);
        assert_eq!(store.get_upper_bound().unwrap(), None);

        store.set_lower_bound(1000).unwrap();
        store.set_upper_bound(1005).unwrap();
        assert_eq!(store.get_lower_bound().unwrap(), Some(1000));
        assert_eq!(store.get_upper_bound().unwrap(), Some(1005));
    }

    #[test]
    fn test_bounds_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksProgressStore::open(temp_dir.path()).unwrap();
            store.set_lower_bound(7).unwrap();
            store.set_upper_bound(9).unwrap();
            store.mark_processed(8).unwrap();
        }
        let store = RocksProgressStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get_lower_bound().unwrap(), Some(7));
        assert_eq!(store.get_upper_bound().unwrap(), Some(9));
        assert_eq!(store.missing_between(7, 9).unwrap().iter().collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn test_advance_upper_bound_is_monotonic() {
        let (store, _temp_dir) = create_test_store();

        assert_eq!(store.advance_upper_bound(100).unwrap(), 100);
        assert_eq!(store.advance_upper_bound(105).unwrap(), 105);
        // An older header arriving late must not move the bound back
        assert_eq!(store.advance_upper_bound(103).unwrap(), 105);
        assert_eq!(store.get_upper_bound().unwrap(), Some(105));
    }

    #[test]
    fn test_missing_between_scenario() {
        let (store, _temp_dir) = create_test_store();
        store.set_lower_bound(1000).unwrap();
        store.set_upper_bound(1005).unwrap();
        for block in [1000, 1001, 1003, 1005] {
            store.mark_processed(block).unwrap();
        }

        let missing = store.missing_between(1000, 1005).unwrap();
        assert_eq!(missing.iter().collect::<Vec<_>>(), vec![1002, 1004]);

        store.mark_processed(1002).unwrap();
        store.mark_processed(1004).unwrap();
        assert!(store.missing_between(1000, 1005).unwrap().is_empty());
    }

    #[test]
    fn test_missing_between_refuses_huge_span() {
        let (store, _dir) = create_test_store();
        store.mark_processed(5).unwrap();

        let err = store.missing_between(0, u64::MAX).unwrap_err();
        assert!(err.to_string().contains("spans more than"));

        let top = store.missing_between(u64::MAX - 1, u64::MAX).unwrap();
        assert_eq!(top.count(), 2);
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let (store, _temp_dir) = create_test_store();
        store.mark_processed(50).unwrap();
        let once = store.missing_between(40, 60).unwrap();
        store.mark_processed(50).unwrap();
        let twice = store.missing_between(40, 60).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.count(), 20);
    }

    #[test]
    fn test_missing_between_is_exact_complement() {
        let (store, _temp_dir) = create_test_store();
        let marked = [3u64, 4, 9, 17, 64, 65, 66, 130, 199];
        for block in marked {
            store.mark_processed(block).unwrap();
        }
        // Markers outside the queried window must not leak in
        store.mark_processed(1).unwrap();
        store.mark_processed(500).unwrap();

        for (lo, hi) in [(0u64, 200u64), (4, 4), (5, 8), (60, 140), (199, 199)] {
            let missing = store.missing_between(lo, hi).unwrap();
            let expected: Vec<u64> = (lo..=hi).filter(|b| !marked.contains(b)).collect();
            assert_eq!(missing.iter().collect::<Vec<_>>(), expected, "range {}..={}", lo, hi);
        }
    }

    #[test]
    fn test_out_of_order_marking_converges() {
        let (a, _dir_a) = create_test_store();
        let (b, _dir_b) = create_test_store();

        a.mark_processed(105).unwrap();
        a.mark_processed(103).unwrap();
        b.mark_processed(103).unwrap();
        b.mark_processed(105).unwrap();

        assert_eq!(
            a.missing_between(100, 110).unwrap(),
            b.missing_between(100, 110).unwrap()
        );
    }

    #[test]
    fn test_compact_removes_markers_below_threshold() {
        let (store, _temp_dir) = create_test_store();
        for block in 90..=110 {
            store.mark_processed(block).unwrap();
        }
        store.set_lower_bound(100).unwrap();
        store.set_upper_bound(110).unwrap();

        let removed = store.compact().unwrap();
        // 90..=98 are strictly below lower - 1 = 99
        assert_eq!(removed, 9);
        assert!(store.get_marker(98).unwrap().is_none());
        assert!(store.get_marker(99).unwrap().is_some());
        assert!(store.get_marker(100).unwrap().is_some());

        // Queries at or above lower are unaffected
        assert!(store.missing_between(100, 110).unwrap().is_empty());

        // Nothing left to remove on a second pass
        assert_eq!(store.compact().unwrap(), 0);
    }

    #[test]
    fn test_compact_without_bounds_is_noop() {
        let (store, _temp_dir) = create_test_store();
        store.mark_processed(1).unwrap();
        assert_eq!(store.compact().unwrap(), 0);
        assert!(store.get_marker(1).unwrap().is_some());
    }
}
