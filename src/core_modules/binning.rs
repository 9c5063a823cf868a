// THEORY:
// The `Binner` is the producer side of the engine. It owns the working copy of the
// histogram collection and is the only thing that mutates bins. Three entry points
// feed it:
//
// 1.  **Events**: a `LabelEvent` adds or removes one pixel vector under one label.
//     Events are validated (pixel length, label id) before they touch any bin; a
//     rejected event leaves the collection unchanged.
// 2.  **Relabeling**: moving a pixel between labels is a removal from the old label
//     followed by an addition to the new one.
// 3.  **Bulk Fill**: a whole image plus label map is binned in parallel, one image
//     row per work item.
//
// Events in one batch that hit the same `(label, key)` are applied in batch order;
// distinct keys are applied in parallel. A remove that follows its add in the batch
// therefore always finds the bin.
//
// Readers never see the working copy. `publish` clones it into an immutable snapshot
// and swaps that into the shared slot. Every mutation holds the write gate shared and
// `publish` holds it exclusively, so a snapshot never contains half of an update.
// Clearing the bins bumps the `reset` counter, so every redraw computed against the
// old bins is abandoned.

use crate::core_modules::collection::{HistogramCollection, UNLABELED};
use crate::core_modules::discretizer::{DiscreteKey, Discretizer};
use crate::core_modules::shared::Shared;
use crate::core_modules::utils::image_helper::image_helper::MultiImage;
use crate::core_modules::viewport::{Generation, ViewportCtx};
use crate::errors::{BinningError, ContextError};
use image::Rgba;
use log::{debug, info, warn};
use parking_lot::RwLock;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelEvent {
    pub pixel: Vec<f32>,
    pub label: usize,
    pub op: Op,
}

impl LabelEvent {
    pub fn add(pixel: Vec<f32>, label: usize) -> Self {
        Self { pixel, label, op: Op::Add }
    }

    pub fn remove(pixel: Vec<f32>, label: usize) -> Self {
        Self { pixel, label, op: Op::Remove }
    }
}

pub struct Binner {
    disc: Discretizer,
    collection: HistogramCollection,
    ignore_labels: bool,
    generation: Arc<Generation>,
    published: Shared<HistogramCollection>,
    /// Mutations hold it shared, `publish` exclusively.
    write_gate: RwLock<()>,
}

impl Binner {
    /// One histogram per entry of `label_colors`; index 0 is the unlabeled set.
    pub fn new(
        ctx: &ViewportCtx,
        label_colors: &[Rgba<u8>],
        shards: usize,
        generation: Arc<Generation>,
    ) -> Result<Self, ContextError> {
        let dimensionality = ctx.dimensionality()?;
        let disc = ctx.discretizer()?;
        let collection = HistogramCollection::new(dimensionality, label_colors, shards);
        let published = Shared::new(collection.clone());
        Ok(Self {
            disc,
            collection,
            ignore_labels: ctx.ignore_labels,
            generation,
            published,
            write_gate: RwLock::new(()),
        })
    }

    pub fn collection(&self) -> &HistogramCollection {
        &self.collection
    }

    pub fn discretizer(&self) -> &Discretizer {
        &self.disc
    }

    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    /// Adds empty histograms for labels created after construction.
    pub fn add_labels(&mut self, label_colors: &[Rgba<u8>]) {
        self.collection.ensure_labels(label_colors);
    }

    fn target(&self, label: usize) -> usize {
        if self.ignore_labels { UNLABELED } else { label }
    }

    fn validate(&self, pixel: &[f32], label: usize) -> Result<usize, BinningError> {
        let expected = self.collection.dimensionality();
        if pixel.len() != expected {
            return Err(BinningError::DimensionMismatch { expected, got: pixel.len() });
        }
        let label = self.target(label);
        if label >= self.collection.len() {
            return Err(BinningError::UnknownLabel { label, count: self.collection.len() });
        }
        Ok(label)
    }

    fn apply_unchecked(&self, pixel: &[f32], label: usize, op: Op) {
        self.apply_keyed(self.disc.discretize(pixel), pixel, label, op);
    }

    fn apply_keyed(&self, key: DiscreteKey, pixel: &[f32], label: usize, op: Op) {
        let hist = &self.collection[label];
        match op {
            Op::Add => hist.add(key, pixel),
            Op::Remove => hist.sub(&key, pixel),
        }
    }

    /// Applies a single event.
    ///
    /// # Panics
    /// Removing a pixel that was never added to its label.
    pub fn apply(&self, event: &LabelEvent) -> Result<(), BinningError> {
        let label = self.validate(&event.pixel, event.label).inspect_err(|err| {
            warn!("rejected label event: {err}");
        })?;
        let _gate = self.write_gate.read();
        self.apply_unchecked(&event.pixel, label, event.op);
        Ok(())
    }

    /// Applies a batch in parallel. The whole batch is rejected if any event is invalid.
    /// Events for the same label and key keep their batch order.
    pub fn apply_batch(&self, events: &[LabelEvent]) -> Result<(), BinningError> {
        let labels = events
            .iter()
            .map(|event| self.validate(&event.pixel, event.label))
            .collect::<Result<Vec<_>, _>>()
            .inspect_err(|err| warn!("rejected event batch: {err}"))?;

        let keys: Vec<DiscreteKey> = events.par_iter().map(|event| self.disc.discretize(&event.pixel)).collect();
        let mut groups: FxHashMap<(usize, &DiscreteKey), Vec<usize>> = FxHashMap::default();
        for (i, (&label, key)) in labels.iter().zip(&keys).enumerate() {
            groups.entry((label, key)).or_default().push(i);
        }

        let _gate = self.write_gate.read();
        groups.into_par_iter().for_each(|((label, key), indices)| {
            for i in indices {
                self.apply_keyed(key.clone(), &events[i].pixel, label, events[i].op);
            }
        });
        debug!("applied {} label events", events.len());
        Ok(())
    }

    /// Moves one pixel from label `from` to label `to`.
    pub fn relabel(&self, pixel: &[f32], from: usize, to: usize) -> Result<(), BinningError> {
        let from = self.validate(pixel, from)?;
        let to = self.validate(pixel, to)?;
        if from == to {
            return Ok(());
        }
        let _gate = self.write_gate.read();
        self.apply_unchecked(pixel, from, Op::Remove);
        self.apply_unchecked(pixel, to, Op::Add);
        Ok(())
    }

    /// Bins every pixel of `image`. Without a label map (or with `ignore_labels`) every
    /// pixel is unlabeled. Returns the number of pixels binned.
    pub fn fill(&self, image: &MultiImage, labels: Option<&[usize]>) -> Result<usize, BinningError> {
        let expected = self.collection.dimensionality();
        if image.bands != expected {
            return Err(BinningError::DimensionMismatch { expected, got: image.bands });
        }
        let labels = if self.ignore_labels { None } else { labels };
        if let Some(labels) = labels {
            if labels.len() != image.pixel_count() {
                return Err(BinningError::LabelMapSize {
                    expected: image.pixel_count(),
                    got: labels.len(),
                });
            }
            let count = self.collection.len();
            if let Some(&label) = labels.iter().find(|&&l| l >= count) {
                return Err(BinningError::UnknownLabel { label, count });
            }
        }
        if expected == 0 || image.pixel_count() == 0 {
            return Ok(0);
        }

        let width = image.width as usize;
        let _gate = self.write_gate.read();
        image.data.par_chunks(width * expected).enumerate().for_each(|(y, row)| {
            for (x, pixel) in row.chunks_exact(expected).enumerate() {
                let label = labels.map_or(UNLABELED, |l| l[y * width + x]);
                self.apply_unchecked(pixel, label, Op::Add);
            }
        });
        info!(
            "binned {} pixels into {} bins",
            image.pixel_count(),
            self.collection.bin_count()
        );
        Ok(image.pixel_count())
    }

    /// Empties every histogram and abandons redraws computed against the old bins.
    pub fn clear(&self) {
        let _gate = self.write_gate.read();
        self.collection.clear();
        let reset = self.generation.bump_reset();
        debug!("bins cleared, reset generation {reset}");
    }

    /// Publishes a snapshot of the current bins. Returns the snapshot version.
    pub fn publish(&self) -> u64 {
        let snapshot = {
            let _gate = self.write_gate.write();
            self.collection.clone()
        };
        let version = self.published.publish(snapshot);
        info!("published histogram snapshot {version}");
        version
    }

    /// The shared slot snapshots are published to.
    pub fn snapshots(&self) -> Shared<HistogramCollection> {
        self.published.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::collection::palette;
    use crate::core_modules::discretizer::DiscreteKey;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn binner(d: usize, labels: usize) -> Binner {
        let ctx = ViewportCtx::for_range(d, 0.0, 3.0, 4).unwrap();
        Binner::new(&ctx, &palette(labels), 4, Generation::new()).unwrap()
    }

    #[test]
    fn event_lands_in_its_bin() {
        let b = binner(3, 2);
        b.apply(&LabelEvent::add(vec![0.4, 1.6, 3.9], 1)).unwrap();
        let bin = b.collection()[1].get(&DiscreteKey::new(vec![0, 2, 3])).unwrap();
        assert_eq!(bin.weight, 1.0);
        assert_eq!(bin.means, vec![0.4, 1.6, 3.9]);
        assert!(b.collection()[0].is_empty());
    }

    #[test]
    fn nearby_pixels_split_at_half_a_bin() {
        let b = binner(3, 1);
        b.apply(&LabelEvent::add(vec![0.0, 0.0, 0.0], 0)).unwrap();
        b.apply(&LabelEvent::add(vec![0.0, 0.0, 0.9], 0)).unwrap();
        let hist = &b.collection()[0];
        assert_eq!(hist.len(), 2);
        let low = hist.get(&DiscreteKey::new(vec![0, 0, 0])).unwrap();
        let high = hist.get(&DiscreteKey::new(vec![0, 0, 1])).unwrap();
        assert_eq!(low.weight, 1.0);
        assert_eq!(high.weight, 1.0);
        assert_eq!(hist.total_weight(), 2);

        b.apply(&LabelEvent::add(vec![0.1, 0.2, 0.3], 0)).unwrap();
        let low = hist.get(&DiscreteKey::new(vec![0, 0, 0])).unwrap();
        assert_eq!(low.weight, 2.0);
        assert_abs_diff_eq!(low.mean_at(2), 0.15, epsilon = 1e-6);
    }

    #[test]
    fn invalid_events_change_nothing() {
        let b = binner(3, 2);
        assert_eq!(
            b.apply(&LabelEvent::add(vec![1.0, 2.0], 1)),
            Err(BinningError::DimensionMismatch { expected: 3, got: 2 })
        );
        assert_eq!(
            b.apply(&LabelEvent::add(vec![1.0, 2.0, 3.0], 7)),
            Err(BinningError::UnknownLabel { label: 7, count: 2 })
        );
        let batch = vec![
            LabelEvent::add(vec![1.0, 1.0, 1.0], 0),
            LabelEvent::add(vec![1.0, 1.0], 0),
        ];
        assert!(b.apply_batch(&batch).is_err());
        assert_eq!(b.collection().total_weight(), 0);
    }

    #[test]
    fn relabel_moves_weight() {
        let b = binner(3, 3);
        let px = vec![2.0, 2.0, 2.0];
        b.apply(&LabelEvent::add(px.clone(), 1)).unwrap();
        b.relabel(&px, 1, 2).unwrap();
        let key = DiscreteKey::new(vec![2, 2, 2]);
        assert_eq!(b.collection()[1].get(&key).unwrap().weight, 0.0);
        assert_eq!(b.collection()[2].get(&key).unwrap().weight, 1.0);
        assert_eq!(b.collection()[1].total_weight(), 0);
        assert_eq!(b.collection()[2].total_weight(), 1);
    }

    #[test]
    #[should_panic(expected = "never populated")]
    fn removing_unknown_pixel_panics() {
        let b = binner(3, 1);
        let _ = b.apply(&LabelEvent::remove(vec![1.0, 1.0, 1.0], 0));
    }

    #[test]
    fn concurrent_batch_keeps_totals_consistent() {
        let b = binner(4, 3);
        let mut rng = StdRng::seed_from_u64(11);
        let events: Vec<LabelEvent> = (0..20_000)
            .map(|_| {
                let px = (0..4).map(|_| rng.gen_range(0.0..3.0f32)).collect();
                LabelEvent::add(px, rng.gen_range(0..3))
            })
            .collect();
        b.apply_batch(&events).unwrap();

        let removals: Vec<LabelEvent> =
            events.iter().step_by(2).map(|e| LabelEvent::remove(e.pixel.clone(), e.label)).collect();
        b.apply_batch(&removals).unwrap();

        assert_eq!(b.collection().total_weight(), 10_000);
        for hist in b.collection() {
            assert_eq!(hist.total_weight() as f64, hist.weight_sum());
        }
    }

    #[test]
    fn fill_respects_label_map() {
        let b = binner(3, 2);
        let img = MultiImage::new(2, 2, 3, vec![
            0.0, 0.0, 0.0, 1.0, 1.0, 1.0,
            2.0, 2.0, 2.0, 3.0, 3.0, 3.0,
        ])
        .unwrap();
        assert_eq!(b.fill(&img, Some(&[0, 1, 1, 0][..])), Ok(4));
        assert_eq!(b.collection()[0].total_weight(), 2);
        assert_eq!(b.collection()[1].total_weight(), 2);
        assert!(b.collection()[1].contains(&DiscreteKey::new(vec![2, 2, 2])));

        assert_eq!(
            b.fill(&img, Some(&[0, 1][..])),
            Err(BinningError::LabelMapSize { expected: 4, got: 2 })
        );
        assert_eq!(
            b.fill(&img, Some(&[0, 0, 0, 5][..])),
            Err(BinningError::UnknownLabel { label: 5, count: 2 })
        );
    }

    #[test]
    fn ignore_labels_bins_everything_unlabeled() {
        let mut ctx = ViewportCtx::for_range(3, 0.0, 3.0, 4).unwrap();
        ctx.ignore_labels = true;
        let b = Binner::new(&ctx, &palette(2), 4, Generation::new()).unwrap();
        let img = MultiImage::new(2, 1, 3, vec![0.0; 6]).unwrap();
        b.fill(&img, Some(&[1, 1][..])).unwrap();
        b.apply(&LabelEvent::add(vec![1.0, 1.0, 1.0], 1)).unwrap();
        assert_eq!(b.collection()[0].total_weight(), 3);
        assert!(b.collection()[1].is_empty());
    }

    #[test]
    fn publish_and_clear() {
        let b = binner(3, 1);
        let snapshots = b.snapshots();
        b.apply(&LabelEvent::add(vec![1.0, 1.0, 1.0], 0)).unwrap();
        assert_eq!(snapshots.current().total_weight(), 0);
        assert_eq!(b.publish(), 1);
        assert_eq!(snapshots.current().total_weight(), 1);

        let epoch = b.generation().epoch();
        b.clear();
        assert!(!epoch.is_current());
        assert_eq!(b.collection().total_weight(), 0);
        assert_eq!(snapshots.current().total_weight(), 1);
    }

    #[test]
    fn batch_removes_follow_their_adds() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(8).build().unwrap();
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..20 {
            let b = binner(3, 2);
            let adds: Vec<LabelEvent> = (0..4000)
                .map(|_| {
                    let px = (0..3).map(|_| rng.gen_range(0.0..3.0f32)).collect();
                    LabelEvent::add(px, rng.gen_range(0..2))
                })
                .collect();
            let mut batch = adds.clone();
            batch.extend(adds.iter().map(|e| LabelEvent::remove(e.pixel.clone(), e.label)));
            pool.install(|| b.apply_batch(&batch)).unwrap();

            assert_eq!(b.collection().total_weight(), 0);
            for hist in b.collection() {
                assert_eq!(hist.weight_sum(), 0.0);
            }
        }
    }

    #[test]
    fn snapshots_published_during_writes_are_whole() {
        let b = binner(3, 2);
        let snapshots = b.snapshots();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut rng = StdRng::seed_from_u64(31);
                for _ in 0..200 {
                    let events: Vec<LabelEvent> = (0..500)
                        .map(|_| {
                            let px = (0..3).map(|_| rng.gen_range(0.0..3.0f32)).collect();
                            LabelEvent::add(px, rng.gen_range(0..2))
                        })
                        .collect();
                    b.apply_batch(&events).unwrap();
                }
            });
            for _ in 0..100 {
                b.publish();
                let snapshot = snapshots.current();
                assert_eq!(snapshot.total_weight() % 500, 0);
                for hist in snapshot.iter() {
                    assert_eq!(hist.total_weight() as f64, hist.weight_sum());
                }
            }
        });
        b.publish();
        assert_eq!(snapshots.current().total_weight(), 100_000);
    }
}
