// THEORY:
// The range reducer is the first half of a redraw. For every label it walks all bins
// in parallel and does two things at once:
//
// 1.  **Filtering**: bins that are too light, that lie outside the bin range of the
//     viewport, or that fall outside the user's limiters are soft-filtered. They stay
//     in the histogram but are not entered into the flat bin index, so they are not
//     drawn. Survivors are appended to the index as `(label, key)`.
// 2.  **Occupancy Reduction**: the per-dimension `[min, max]` bin index occupied by
//     the label is folded up. Each worker keeps a private `RangeReduction`, and the
//     partial results are combined with `join` (component-wise min of minimums, max
//     of maximums). The join is associative and commutative, so the result does not
//     depend on how the shards were spread over threads.
//
// Occupancy covers every bin that holds weight, filtered or not: the boundary seeds
// the limiter controls and has to show where the label really lives.
//
// The generation is checked before each shard. New boundaries are written only
// after every label has been reduced within a still-current epoch.

use crate::core_modules::bin::bin::Bin;
use crate::core_modules::bin_set::{Boundary, EMPTY_RANGE, LabelHistogram};
use crate::core_modules::collection::{HistogramCollection, UNLABELED};
use crate::core_modules::flat_index::{self, BinIndex, IndexEntry};
use crate::core_modules::viewport::{BandDesc, Epoch, ViewportCtx};
use crate::errors::{Cancelled, RangeError};
use log::{debug, warn};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;

/// How the flat index is ordered after reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shuffle {
    Off,
    Seeded(u64),
    #[default]
    Random,
}

/// Per-call filter settings.
#[derive(Debug, Clone)]
pub struct ReduceParams {
    pub min_weight: f32,
    /// Inclusive `(low, high)` bin index window per dimension.
    pub limiters: Option<Vec<(u8, u8)>>,
    pub show_unlabeled: bool,
    pub show_labeled: bool,
    pub shuffle: Shuffle,
}

impl Default for ReduceParams {
    fn default() -> Self {
        Self {
            min_weight: 1.0,
            limiters: None,
            show_unlabeled: true,
            show_labeled: true,
            shuffle: Shuffle::default(),
        }
    }
}

/// One worker's share of the occupancy reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeReduction {
    ranges: Vec<(u8, u8)>,
}

impl RangeReduction {
    pub fn empty(dimensionality: usize) -> Self {
        Self { ranges: vec![EMPTY_RANGE; dimensionality] }
    }

    #[inline]
    pub fn record(&mut self, key: &[u8]) {
        for (range, &k) in self.ranges.iter_mut().zip(key) {
            range.0 = range.0.min(k);
            range.1 = range.1.max(k);
        }
    }

    pub fn join(mut self, other: Self) -> Self {
        for (local, remote) in self.ranges.iter_mut().zip(other.ranges) {
            local.0 = local.0.min(remote.0);
            local.1 = local.1.max(remote.1);
        }
        self
    }

    pub fn into_boundary(self) -> Boundary {
        self.ranges
    }
}

struct BinFilter<'a> {
    visible: bool,
    min_weight: f32,
    nbins: usize,
    limiters: Option<&'a [(u8, u8)]>,
}

impl BinFilter<'_> {
    #[inline]
    fn admits(&self, key: &[u8], bin: &Bin) -> bool {
        if !self.visible || bin.weight < self.min_weight {
            return false;
        }
        if key.iter().any(|&k| k as usize >= self.nbins) {
            return false;
        }
        match self.limiters {
            Some(limiters) => key
                .iter()
                .zip(limiters)
                .all(|(&k, &(low, high))| low <= k && k <= high),
            None => true,
        }
    }
}

struct LabelPass<'a> {
    label: usize,
    dimensionality: usize,
    filter: BinFilter<'a>,
    meta: &'a [BandDesc],
    maxval: f32,
}

impl LabelPass<'_> {
    fn run(&self, hist: &LabelHistogram, index: &BinIndex, epoch: &Epoch) -> Result<Boundary, Cancelled> {
        let reduction = hist
            .shards()
            .par_iter()
            .map(|shard| -> Result<RangeReduction, Cancelled> {
                epoch.check()?;
                let bins = shard.read();
                let mut partial = RangeReduction::empty(self.dimensionality);
                let mut pending = Vec::new();
                for (key, bin) in bins.iter() {
                    if bin.weight > 0.0 {
                        partial.record(key);
                    }
                    if self.filter.admits(key, bin) {
                        bin.display_color(self.meta, self.maxval);
                        pending.push((self.label, key.clone()));
                    }
                }
                drop(bins);
                index.append(pending);
                Ok(partial)
            })
            .try_reduce(
                || RangeReduction::empty(self.dimensionality),
                |a, b| Ok(a.join(b)),
            )?;
        Ok(reduction.into_boundary())
    }
}

/// Runs the reducer over one label histogram, appending survivors to `index`.
pub fn reduce_label(
    label: usize,
    hist: &LabelHistogram,
    ctx: &ViewportCtx,
    params: &ReduceParams,
    index: &BinIndex,
    epoch: &Epoch,
) -> Result<Boundary, RangeError> {
    let dimensionality = ctx.dimensionality()?;
    let nbins = ctx.discretizer()?.nbins();
    if hist.dimensionality() != dimensionality {
        return Err(RangeError::DimensionMismatch {
            label,
            expected: dimensionality,
            got: hist.dimensionality(),
        });
    }
    let limiters = params.limiters.as_deref();
    if let Some(limiters) = limiters {
        if limiters.len() != dimensionality {
            return Err(RangeError::Limiters { expected: dimensionality, got: limiters.len() });
        }
    }
    let visible = if label == UNLABELED { params.show_unlabeled } else { params.show_labeled };
    let pass = LabelPass {
        label,
        dimensionality,
        filter: BinFilter { visible, min_weight: params.min_weight, nbins, limiters },
        meta: ctx.meta(),
        maxval: ctx.maxval.unwrap_or(0.0),
    };
    let boundary = pass.run(hist, index, epoch)?;
    debug!(
        "reduced label {label} ({}) over {:?}: {} bins",
        ctx.label_name(label).unwrap_or("unnamed"),
        ctx.representation,
        hist.len()
    );
    Ok(boundary)
}

/// Output of the reduction phase of one redraw.
#[derive(Debug, Clone)]
pub struct PreparedBins {
    pub entries: Vec<IndexEntry>,
    pub boundaries: Vec<Boundary>,
}

/// Reduces every label of the collection and freezes the flat bin index.
pub fn prepare_polylines(
    ctx: &ViewportCtx,
    sets: &HistogramCollection,
    params: &ReduceParams,
    epoch: &Epoch,
) -> Result<PreparedBins, RangeError> {
    let dimensionality = ctx.dimensionality()?;
    for (label, hist) in sets.iter().enumerate() {
        if hist.dimensionality() != dimensionality {
            warn!(
                "label {label} has dimensionality {}, viewport expects {dimensionality}",
                hist.dimensionality()
            );
            return Err(RangeError::DimensionMismatch {
                label,
                expected: dimensionality,
                got: hist.dimensionality(),
            });
        }
    }

    let index = BinIndex::new();
    let mut boundaries = Vec::with_capacity(sets.len());
    for (label, hist) in sets.iter().enumerate() {
        epoch.check()?;
        boundaries.push(reduce_label(label, hist, ctx, params, &index, epoch)?);
    }
    epoch.check()?;

    for (hist, boundary) in sets.iter().zip(&boundaries) {
        hist.set_boundary(boundary.clone());
    }

    let mut entries = index.freeze();
    match params.shuffle {
        Shuffle::Off => {}
        Shuffle::Seeded(seed) => flat_index::shuffle(&mut entries, &mut StdRng::seed_from_u64(seed)),
        Shuffle::Random => flat_index::shuffle(&mut entries, &mut rand::thread_rng()),
    }
    if entries.is_empty() {
        debug!("reduction left no bins to draw");
    } else {
        debug!("reduction kept {} bins over {} labels", entries.len(), sets.len());
    }
    Ok(PreparedBins { entries, boundaries })
}
