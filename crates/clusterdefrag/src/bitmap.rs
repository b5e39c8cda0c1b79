//! Cluster allocation bitmap for one volume snapshot.
//!
//! One bit per cluster, set when the cluster is allocated. The bitmap covers
//! `[starting_lcn, starting_lcn + len)` and never changes length during a run.
//! All public methods take absolute LCNs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlannerError, PlannerResult};

const WORD_BITS: u64 = 64;

/// Fixed-length allocation bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBitmap {
    starting_lcn: u64,
    len: u64,
    words: Vec<u64>,
}

impl ClusterBitmap {
    /// Creates a bitmap of `len` free clusters starting at `starting_lcn`.
    pub fn new(starting_lcn: u64, len: u64) -> Self {
        let word_count = len.div_ceil(WORD_BITS) as usize;
        Self {
            starting_lcn,
            len,
            words: vec![0; word_count],
        }
    }

    /// Builds a bitmap from one flag per cluster (`true` = allocated).
    pub fn from_bools(starting_lcn: u64, bits: &[bool]) -> Self {
        let mut bitmap = Self::new(starting_lcn, bits.len() as u64);
        for (i, used) in bits.iter().enumerate() {
            if *used {
                bitmap.set(starting_lcn + i as u64, true);
            }
        }
        bitmap
    }

    /// Decodes the volume bitmap buffer layout: LSB-first, one bit per cluster.
    pub fn from_bytes(starting_lcn: u64, bytes: &[u8], bitmap_size: u64) -> PlannerResult<Self> {
        let needed = bitmap_size.div_ceil(8);
        if (bytes.len() as u64) < needed {
            return Err(PlannerError::Device {
                reason: format!(
                    "bitmap buffer holds {} bytes, {} clusters need {}",
                    bytes.len(),
                    bitmap_size,
                    needed
                ),
            });
        }

        let mut bitmap = Self::new(starting_lcn, bitmap_size);
        for (word_idx, chunk) in bytes[..needed as usize].chunks(8).enumerate() {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            bitmap.words[word_idx] = u64::from_le_bytes(raw);
        }
        bitmap.clear_tail();

        debug!(
            "Decoded bitmap: {} clusters from LCN {}, {} used",
            bitmap_size,
            starting_lcn,
            bitmap.count_used()
        );
        Ok(bitmap)
    }

    /// First LCN covered by the bitmap.
    pub fn starting_lcn(&self) -> u64 {
        self.starting_lcn
    }

    /// Number of clusters covered.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the bitmap covers no clusters.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First LCN past the end of the bitmap.
    pub fn end(&self) -> u64 {
        self.starting_lcn + self.len
    }

    /// Returns true if `[lcn, lcn + count)` lies inside the bitmap.
    pub fn contains_range(&self, lcn: u64, count: u64) -> bool {
        lcn >= self.starting_lcn
            && lcn
                .checked_add(count)
                .is_some_and(|end| end <= self.end())
    }

    #[inline]
    fn index(&self, lcn: u64) -> (usize, u64) {
        assert!(
            lcn >= self.starting_lcn && lcn < self.end(),
            "LCN {} outside bitmap [{}, {})",
            lcn,
            self.starting_lcn,
            self.end()
        );
        let i = lcn - self.starting_lcn;
        ((i / WORD_BITS) as usize, i % WORD_BITS)
    }

    /// Returns true if the cluster is allocated. Panics outside the bitmap.
    #[inline]
    pub fn get(&self, lcn: u64) -> bool {
        let (word, bit) = self.index(lcn);
        self.words[word] & (1 << bit) != 0
    }

    /// Marks a cluster allocated or free. Panics outside the bitmap.
    #[inline]
    pub fn set(&mut self, lcn: u64, used: bool) {
        let (word, bit) = self.index(lcn);
        if used {
            self.words[word] |= 1 << bit;
        } else {
            self.words[word] &= !(1 << bit);
        }
    }

    /// Marks `[lcn, lcn + count)` allocated or free.
    pub fn set_range(&mut self, lcn: u64, count: u64, used: bool) {
        for c in lcn..lcn + count {
            self.set(c, used);
        }
    }

    /// Returns true if every cluster of `[lcn, lcn + count)` is free.
    /// Runs that leave the bitmap are never free.
    pub fn is_range_free(&self, lcn: u64, count: u64) -> bool {
        if !self.contains_range(lcn, count) {
            return false;
        }
        match self.next_used(lcn) {
            Some(used) => used >= lcn + count,
            None => true,
        }
    }

    /// Number of allocated clusters.
    pub fn count_used(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// Number of free clusters.
    pub fn count_free(&self) -> u64 {
        self.len - self.count_used()
    }

    /// First free cluster at or after `from`.
    pub fn next_free(&self, from: u64) -> Option<u64> {
        self.scan(from, true)
    }

    /// First allocated cluster at or after `from`.
    pub fn next_used(&self, from: u64) -> Option<u64> {
        self.scan(from, false)
    }

    fn scan(&self, from: u64, want_free: bool) -> Option<u64> {
        let mut i = from.max(self.starting_lcn) - self.starting_lcn;
        while i < self.len {
            let word_idx = (i / WORD_BITS) as usize;
            let bit = i % WORD_BITS;
            let raw = if want_free {
                !self.words[word_idx]
            } else {
                self.words[word_idx]
            };
            let word = raw >> bit;
            if word != 0 {
                let found = i + word.trailing_zeros() as u64;
                return (found < self.len).then_some(self.starting_lcn + found);
            }
            i = (word_idx as u64 + 1) * WORD_BITS;
        }
        None
    }

    // Bits past `len` in the last word stay clear so popcounts and scans ignore them.
    fn clear_tail(&mut self) {
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}
