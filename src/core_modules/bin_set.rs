// THEORY:
// A `LabelHistogram` (the "bin set" of one label) is the sparse histogram of every
// pixel vector currently assigned to that label. It maps a `DiscreteKey` to the
// `Bin` accumulating the pixels with that key.
//
// Key architectural principles:
// 1.  **Sharded Exclusion**: the map is split into a power-of-two number of shards,
//     each behind its own `RwLock`. A key always lands in the same shard, so
//     concurrent updates to unrelated keys almost never contend, and a reduction
//     pass can walk the shards in parallel under read locks.
// 2.  **Independent Total**: `total_weight` is an atomic counter maintained next to,
//     not under, the shard locks. It is read on every opacity computation and must
//     never wait for a writer.
// 3.  **Soft Filtering**: nothing in here ever removes a bin. A bin that drops to
//     weight zero stays queryable; passes downstream decide what to draw.
// 4.  **Reducer-Owned Boundary**: `boundary` holds the per-dimension occupied index
//     range. It starts inverted at `(255, 0)` and only the range reducer writes it.

use crate::core_modules::bin::bin::Bin;
use crate::core_modules::discretizer::DiscreteKey;
use image::Rgba;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};

pub type Shard = RwLock<FxHashMap<DiscreteKey, Bin>>;

/// Per-dimension `(min, max)` occupied bin index.
pub type Boundary = Vec<(u8, u8)>;

pub const EMPTY_RANGE: (u8, u8) = (255, 0);

pub struct LabelHistogram {
    label_color: Rgba<u8>,
    dimensionality: usize,
    shards: Box<[Shard]>,
    shard_bits: u32,
    total_weight: AtomicI64,
    boundary: RwLock<Boundary>,
}

impl LabelHistogram {
    /// `shards` is rounded up to the next power of two.
    pub fn new(label_color: Rgba<u8>, dimensionality: usize, shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| RwLock::new(FxHashMap::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            label_color,
            dimensionality,
            shards,
            shard_bits: count.trailing_zeros(),
            total_weight: AtomicI64::new(0),
            boundary: RwLock::new(vec![EMPTY_RANGE; dimensionality]),
        }
    }

    #[inline]
    fn shard_index(&self, key: &DiscreteKey) -> usize {
        if self.shard_bits == 0 {
            return 0;
        }
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        // High bits pick the shard; the map inside the shard consumes the low ones.
        (hasher.finish() >> (u64::BITS - self.shard_bits)) as usize
    }

    #[inline]
    fn shard(&self, key: &DiscreteKey) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Folds `pixel` into the bin for `key`, creating the bin if needed.
    pub fn add(&self, key: DiscreteKey, pixel: &[f32]) {
        debug_assert_eq!(key.len(), self.dimensionality);
        self.shard(&key).write().entry(key).or_default().add(pixel);
        self.total_weight.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes `pixel` from the bin for `key`.
    ///
    /// # Panics
    /// If no pixel was ever added under `key`.
    pub fn sub(&self, key: &DiscreteKey, pixel: &[f32]) {
        {
            let mut shard = self.shard(key).write();
            let Some(bin) = shard.get_mut(key) else {
                panic!("LabelHistogram::sub on {key:?}, which was never populated");
            };
            bin.sub(pixel);
        }
        self.total_weight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Runs `f` on the bin for `key` under the shard's read lock.
    pub fn with_bin<R>(&self, key: &DiscreteKey, f: impl FnOnce(&Bin) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(f)
    }

    pub fn get(&self, key: &DiscreteKey) -> Option<Bin> {
        self.with_bin(key, Bin::clone)
    }

    pub fn contains(&self, key: &DiscreteKey) -> bool {
        self.shard(key).read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    pub fn total_weight(&self) -> i64 {
        self.total_weight.load(Ordering::Acquire)
    }

    /// Sum of all bin weights, walked bin by bin. Equals `total_weight` when quiescent.
    pub fn weight_sum(&self) -> f64 {
        self.shards
            .iter()
            .map(|s| s.read().values().map(|b| b.weight as f64).sum::<f64>())
            .sum()
    }

    pub fn label_color(&self) -> Rgba<u8> {
        self.label_color
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary.read().clone()
    }

    pub(crate) fn set_boundary(&self, boundary: Boundary) {
        *self.boundary.write() = boundary;
    }

    /// Drops all bins and resets the weight and boundary.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
        self.total_weight.store(0, Ordering::Release);
        self.set_boundary(vec![EMPTY_RANGE; self.dimensionality]);
    }
}

impl Clone for LabelHistogram {
    /// Deep copy taken with every shard read-locked at once. The copy's total weight
    /// is recounted from the copied bins.
    fn clone(&self) -> Self {
        let guards: Vec<_> = self.shards.iter().map(|s| s.read()).collect();
        let maps: Vec<FxHashMap<DiscreteKey, Bin>> = guards.iter().map(|g| (**g).clone()).collect();
        drop(guards);
        let total: i64 = maps
            .iter()
            .flat_map(|m| m.values())
            .map(|b| b.weight.round() as i64)
            .sum();
        let shards = maps.into_iter().map(RwLock::new).collect::<Vec<_>>().into_boxed_slice();
        Self {
            label_color: self.label_color,
            dimensionality: self.dimensionality,
            shards,
            shard_bits: self.shard_bits,
            total_weight: AtomicI64::new(total),
            boundary: RwLock::new(self.boundary()),
        }
    }
}

impl std::fmt::Debug for LabelHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelHistogram")
            .field("label_color", &self.label_color)
            .field("dimensionality", &self.dimensionality)
            .field("bins", &self.len())
            .field("total_weight", &self.total_weight())
            .finish()
    }
}
