// THEORY:
// The flat bin index lists every bin that survived the range reducer's filter as a
// `(label, key)` pair. It is the only hand-off between the two parallel passes of a
// redraw: reduction workers append to it concurrently, then it is frozen into a
// plain `Vec` whose positions fix where each bin's vertices are written.
//
// Workers collect entries locally and append them one batch at a time, so the lock
// is taken once per batch and not once per bin. No ordering across labels or
// batches is promised.

use crate::core_modules::discretizer::DiscreteKey;
use parking_lot::Mutex;
use rand::Rng;
use rand::seq::SliceRandom;

pub type IndexEntry = (usize, DiscreteKey);

#[derive(Debug, Default)]
pub struct BinIndex {
    entries: Mutex<Vec<IndexEntry>>,
}

impl BinIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: IndexEntry) {
        self.entries.lock().push(entry);
    }

    /// Appends a worker's pending entries in one go.
    pub fn append(&self, mut batch: Vec<IndexEntry>) {
        if batch.is_empty() {
            return;
        }
        self.entries.lock().append(&mut batch);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ends the append phase.
    pub fn freeze(self) -> Vec<IndexEntry> {
        self.entries.into_inner()
    }
}

/// Randomizes drawing order so that no label is consistently painted on top.
pub fn shuffle<R: Rng + ?Sized>(entries: &mut [IndexEntry], rng: &mut R) {
    entries.shuffle(rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::sync::Arc;

    #[test]
    fn concurrent_batches_all_land() {
        let index = Arc::new(BinIndex::new());
        let workers: Vec<_> = (0..4usize)
            .map(|label| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || {
                    for chunk in 0..10u8 {
                        let batch = (0..5u8)
                            .map(|i| (label, DiscreteKey::new(vec![chunk, i])))
                            .collect();
                        index.append(batch);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let index = Arc::try_unwrap(index).unwrap();
        let entries = index.freeze();
        assert_eq!(entries.len(), 4 * 10 * 5);
        assert_eq!(entries.iter().filter(|(label, _)| *label == 2).count(), 50);
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let entries: Vec<IndexEntry> = (0..32u8).map(|i| (0, DiscreteKey::new(vec![i]))).collect();
        let mut a = entries.clone();
        let mut b = entries.clone();
        shuffle(&mut a, &mut StdRng::seed_from_u64(9));
        shuffle(&mut b, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, entries);
    }
}
