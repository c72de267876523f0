// Copyright (c) 2025 The snn-sim authors. All rights reserved.

//! The per-core weight cache and the fetch merge policy.

use std::collections::HashMap;

/// The cache key for one `(pre_local, post_local)` weight.
#[must_use]
pub fn cache_key(pre_local: u32, post_local: u32) -> u64 {
    (u64::from(pre_local) << 32) | u64::from(post_local)
}

/// How a miss is widened into one memory read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    /// Fetch the cacheline-aligned group of weights containing the miss.
    Cacheline {
        /// The line size in bytes; 64 fetches 16 f32 values.
        line_size_bytes: u32,
    },
    /// Fetch the entire presynaptic row (NPC weights).
    Row,
}

/// The post-index range one merged read covers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MergeRange {
    /// Presynaptic local index (the matrix row).
    pub pre: u32,
    /// First post index of the fetch.
    pub post_start: u32,
    /// Number of consecutive weights fetched.
    pub count: u32,
}

impl MergeRange {
    /// The coalescing key: one in-flight fetch per `(pre, merged range)`.
    #[must_use]
    pub fn key(&self) -> u64 {
        cache_key(self.pre, self.post_start)
    }
}

impl MergePolicy {
    /// Compute the range covering a miss on `(pre, post)`.
    #[must_use]
    pub fn range(&self, pre: u32, post: u32, neurons_per_core: u32) -> MergeRange {
        match *self {
            MergePolicy::Row => MergeRange {
                pre,
                post_start: 0,
                count: neurons_per_core,
            },
            MergePolicy::Cacheline { line_size_bytes } => {
                let floats_per_line = (line_size_bytes / 4).max(1);
                let post_start = (post / floats_per_line) * floats_per_line;
                MergeRange {
                    pre,
                    post_start,
                    count: floats_per_line.min(neurons_per_core - post_start),
                }
            }
        }
    }
}

/// Bounded map from `(pre_local, post_local)` to a weight.
///
/// On overflow the whole cache is flushed rather than evicting entries one
/// at a time.
pub struct WeightCache {
    entries: HashMap<u64, f32>,
    max_entries: usize,
    hits: u64,
    misses: u64,
    flushes: u64,
}

impl WeightCache {
    /// A cache bounded to `max_entries` weights.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            hits: 0,
            misses: 0,
            flushes: 0,
        }
    }

    /// Look a weight up, counting the hit or miss.
    pub fn lookup(&mut self, pre_local: u32, post_local: u32) -> Option<f32> {
        match self.entries.get(&cache_key(pre_local, post_local)) {
            Some(weight) => {
                self.hits += 1;
                Some(*weight)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Read a weight without touching the hit/miss counters.
    #[must_use]
    pub fn peek(&self, pre_local: u32, post_local: u32) -> Option<f32> {
        self.entries.get(&cache_key(pre_local, post_local)).copied()
    }

    /// Insert one weight, flushing first if the cache is full.
    pub fn insert(&mut self, pre_local: u32, post_local: u32, weight: f32) {
        if self.entries.len() >= self.max_entries {
            self.entries.clear();
            self.flushes += 1;
        }
        self.entries.insert(cache_key(pre_local, post_local), weight);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }

    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_packs_pre_and_post() {
        assert_eq!(cache_key(0, 0), 0);
        assert_eq!(cache_key(0, 5), 5);
        assert_eq!(cache_key(1, 0), 1 << 32);
        assert_ne!(cache_key(1, 2), cache_key(2, 1));
    }

    #[test]
    fn cacheline_range_is_aligned() {
        let policy = MergePolicy::Cacheline {
            line_size_bytes: 64,
        };
        // 64B lines hold 16 floats; a miss on post=5 fetches [0, 16)
        let range = policy.range(0, 5, 64);
        assert_eq!(
            range,
            MergeRange {
                pre: 0,
                post_start: 0,
                count: 16
            }
        );

        // post=21 lands in the second line
        let range = policy.range(3, 21, 64);
        assert_eq!(
            range,
            MergeRange {
                pre: 3,
                post_start: 16,
                count: 16
            }
        );
    }

    #[test]
    fn cacheline_range_clipped_to_row() {
        let policy = MergePolicy::Cacheline {
            line_size_bytes: 64,
        };
        // With NPC=20, the second line only has 4 weights left
        let range = policy.range(0, 17, 20);
        assert_eq!(
            range,
            MergeRange {
                pre: 0,
                post_start: 16,
                count: 4
            }
        );
    }

    #[test]
    fn row_range_covers_row() {
        let range = MergePolicy::Row.range(7, 3, 64);
        assert_eq!(
            range,
            MergeRange {
                pre: 7,
                post_start: 0,
                count: 64
            }
        );
    }

    #[test]
    fn lookup_counts_hits_and_misses() {
        let mut cache = WeightCache::new(16);
        assert_eq!(cache.lookup(0, 0), None);
        cache.insert(0, 0, 0.5);
        assert_eq!(cache.lookup(0, 0), Some(0.5));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn overflow_flushes_whole_cache() {
        let mut cache = WeightCache::new(4);
        for post in 0..4 {
            cache.insert(0, post, post as f32);
        }
        assert_eq!(cache.len(), 4);

        // The fifth insert flushes everything first
        cache.insert(0, 4, 4.0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.flushes(), 1);
        assert_eq!(cache.peek(0, 0), None);
        assert_eq!(cache.peek(0, 4), Some(4.0));
    }
}
