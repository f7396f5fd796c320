//! Missing-range bit-vector
//!
//! One bit per block number in an inclusive range, keyed by
//! `block - start`. A set bit means the block has no presence marker.
//! Built fresh for each query and never persisted.

use thiserror::Error;

/// Widest range one query may cover (128 MiB of bits).
pub const MAX_SPAN: u64 = 1 << 30;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("range [{start}, {end}] spans more than {MAX_SPAN} blocks")]
pub struct SpanTooLarge {
    pub start: u64,
    pub end: u64,
}

/// Bit-vector of missing block numbers over `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlocks {
    start: u64,
    len: u64,
    words: Vec<u64>,
}

impl MissingBlocks {
    /// Create a bit-vector over `[start, end]` with every bit set.
    ///
    /// An inverted range (`start > end`) yields an empty vector. Ranges
    /// wider than `MAX_SPAN` are refused.
    pub fn all_missing(start: u64, end: u64) -> Result<Self, SpanTooLarge> {
        if start > end {
            return Ok(Self {
                start,
                len: 0,
                words: Vec::new(),
            });
        }
        let len = (end - start)
            .checked_add(1)
            .filter(|len| *len <= MAX_SPAN)
            .ok_or(SpanTooLarge { start, end })?;
        let word_count = len.div_ceil(64) as usize;
        let mut words = vec![u64::MAX; word_count];
        let tail = len % 64;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Ok(Self { start, len, words })
    }

    /// First block number covered.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Number of block numbers covered (missing or not).
    pub fn span(&self) -> u64 {
        self.len
    }

    /// Clear the bit for `block`. Numbers outside the range are ignored.
    pub fn clear(&mut self, block: u64) {
        if let Some((word, bit)) = self.position(block) {
            self.words[word] &= !(1u64 << bit);
        }
    }

    /// Whether `block` is inside the range and still marked missing.
    pub fn contains(&self, block: u64) -> bool {
        match self.position(block) {
            Some((word, bit)) => self.words[word] & (1u64 << bit) != 0,
            None => false,
        }
    }

    /// Number of missing blocks.
    pub fn count(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Missing block numbers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        let start = self.start;
        self.words.iter().enumerate().flat_map(move |(i, word)| {
            let base = start + (i as u64) * 64;
            SetBits(*word).map(move |bit| base + u64::from(bit))
        })
    }

    fn position(&self, block: u64) -> Option<(usize, u32)> {
        if block < self.start {
            return None;
        }
        let offset = block - self.start;
        if offset >= self.len {
            return None;
        }
        Some(((offset / 64) as usize, (offset % 64) as u32))
    }
}

/// Iterator over the set bit positions of one word.
struct SetBits(u64);

impl Iterator for SetBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(bit)
    }
}
