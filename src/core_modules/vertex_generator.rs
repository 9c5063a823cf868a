// THEORY:
// The vertex generator is the second half of a redraw. It expands every entry of
// the frozen flat bin index into one polyline: one vertex per dimension, where `x` is
// the axis index and `y` the position on that axis.
//
// Key architectural principles:
// 1.  **Disjoint Output**: entry `i` owns vertices `i * D .. (i + 1) * D` of the output
//     region. The region is split with `par_chunks_mut`, so workers never touch the
//     same memory and need no synchronization beyond the split itself.
// 2.  **Validate, Then Write**: everything that can be known up front (context
//     validity, illuminant length, buffer size, label ids, key lengths) is checked
//     before the first vertex is written. A bin that disappears or has the wrong
//     dimensionality still aborts mid-pass; an aborted buffer is never valid.
// 3.  **Two Placements**: in bin-center mode the vertex sits at the middle of its bin;
//     in mean mode at the true mean of the pixels in the bin. Illumination correction
//     subtracts a per-dimension illuminant from either.

use crate::core_modules::bin::bin::Bin;
use crate::core_modules::bin_set::LabelHistogram;
use crate::core_modules::collection::HistogramCollection;
use crate::core_modules::discretizer::Discretizer;
use crate::core_modules::flat_index::IndexEntry;
use crate::core_modules::viewport::{BandDesc, Epoch, ViewportCtx};
use crate::errors::VertexError;
use rayon::prelude::*;

const DEFAULT_BATCH: usize = 4096;

/// One polyline vertex as handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(C)]
pub struct Vertex {
    /// Axis (dimension) index.
    pub x: f32,
    /// Position on the axis, in image value units.
    pub y: f32,
    pub color: [u8; 4],
    /// Bin weight relative to its label's total weight.
    pub opacity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    #[default]
    Label,
    Mean,
}

#[derive(Debug, Clone)]
pub struct VertexOptions {
    pub draw_means: bool,
    pub illuminant_correction: bool,
    pub illuminant: Vec<f32>,
    pub color_mode: ColorMode,
    /// Index entries per work item; the generation is checked once per item.
    pub batch: usize,
}

impl Default for VertexOptions {
    fn default() -> Self {
        Self {
            draw_means: false,
            illuminant_correction: false,
            illuminant: Vec::new(),
            color_mode: ColorMode::default(),
            batch: DEFAULT_BATCH,
        }
    }
}

/// Preallocated vertex storage, sized like a GPU buffer before mapping.
#[derive(Debug, Clone, Default)]
pub struct VertexBuffer {
    vertices: Vec<Vertex>,
}

impl VertexBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resizes to exactly `bins * dimensionality` zeroed vertices.
    pub fn allocate(&mut self, bins: usize, dimensionality: usize) {
        self.vertices.clear();
        self.vertices.resize(bins * dimensionality, Vertex::default());
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn as_slice(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn as_mut_slice(&mut self) -> &mut [Vertex] {
        &mut self.vertices
    }

    pub fn into_vec(self) -> Vec<Vertex> {
        self.vertices
    }
}

struct Expansion<'a> {
    dimensionality: usize,
    disc: Discretizer,
    illuminant: Option<&'a [f32]>,
    draw_means: bool,
    color_mode: ColorMode,
    meta: &'a [BandDesc],
    maxval: f32,
}

impl Expansion<'_> {
    fn expand(
        &self,
        label: usize,
        set: &LabelHistogram,
        key: &[u8],
        bin: &Bin,
        out: &mut [Vertex],
    ) -> Result<(), VertexError> {
        if bin.dimensionality() != self.dimensionality {
            return Err(VertexError::DimensionMismatch {
                label,
                expected: self.dimensionality,
                got: bin.dimensionality(),
            });
        }
        let color = match self.color_mode {
            ColorMode::Label => set.label_color(),
            ColorMode::Mean => bin.display_color(self.meta, self.maxval),
        };
        let total = set.total_weight();
        let opacity = if total > 0 { bin.weight / total as f32 } else { 0.0 };
        let use_means = self.draw_means && bin.weight > 0.0;

        for (d, vertex) in out.iter_mut().enumerate() {
            let mut y = if use_means {
                bin.mean_at(d)
            } else {
                self.disc.bin_center(key[d])
            };
            if let Some(illuminant) = self.illuminant {
                y -= illuminant[d];
            }
            *vertex = Vertex { x: d as f32, y, color: color.0, opacity };
        }
        Ok(())
    }
}

/// Writes `D` vertices per index entry into `out`. Returns the number of polylines.
pub fn store_vertices(
    ctx: &ViewportCtx,
    sets: &HistogramCollection,
    entries: &[IndexEntry],
    out: &mut [Vertex],
    options: &VertexOptions,
    epoch: &Epoch,
) -> Result<usize, VertexError> {
    let dimensionality = ctx.dimensionality()?;
    let disc = ctx.discretizer()?;

    let illuminant = if options.illuminant_correction {
        if options.illuminant.len() != dimensionality {
            return Err(VertexError::Illuminant {
                expected: dimensionality,
                got: options.illuminant.len(),
            });
        }
        Some(options.illuminant.as_slice())
    } else {
        None
    };

    let required = entries.len() * dimensionality;
    if out.len() < required {
        return Err(VertexError::BufferTooSmall { required, capacity: out.len() });
    }

    for (label, set) in sets.iter().enumerate() {
        if set.dimensionality() != dimensionality {
            return Err(VertexError::DimensionMismatch {
                label,
                expected: dimensionality,
                got: set.dimensionality(),
            });
        }
    }
    for (label, key) in entries {
        if *label >= sets.len() {
            return Err(VertexError::BadLabel(*label));
        }
        if key.len() != dimensionality {
            return Err(VertexError::DimensionMismatch {
                label: *label,
                expected: dimensionality,
                got: key.len(),
            });
        }
    }
    if dimensionality == 0 || entries.is_empty() {
        return Ok(entries.len());
    }

    let expansion = Expansion {
        dimensionality,
        disc,
        illuminant,
        draw_means: options.draw_means,
        color_mode: options.color_mode,
        meta: ctx.meta(),
        maxval: ctx.maxval.unwrap_or(0.0),
    };
    let batch = options.batch.clamp(1, entries.len());

    out[..required]
        .par_chunks_mut(dimensionality * batch)
        .zip(entries.par_chunks(batch))
        .try_for_each(|(region, items)| -> Result<(), VertexError> {
            epoch.check()?;
            for (polyline, (label, key)) in region.chunks_mut(dimensionality).zip(items) {
                let set = &sets[*label];
                set.with_bin(key, |bin| expansion.expand(*label, set, key, bin, polyline))
                    .ok_or(VertexError::MissingBin(*label))??;
            }
            Ok(())
        })?;

    Ok(entries.len())
}

/// Allocates a buffer of the right size and fills it.
pub fn generate_vertices(
    ctx: &ViewportCtx,
    sets: &HistogramCollection,
    entries: &[IndexEntry],
    options: &VertexOptions,
    epoch: &Epoch,
) -> Result<VertexBuffer, VertexError> {
    let mut buffer = VertexBuffer::new();
    buffer.allocate(entries.len(), ctx.dimensionality()?);
    store_vertices(ctx, sets, entries, buffer.as_mut_slice(), options, epoch)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::collection::palette;
    use crate::core_modules::discretizer::DiscreteKey;
    use crate::core_modules::viewport::Generation;
    use crate::errors::{Cancelled, status_code};
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn scenario() -> (ViewportCtx, HistogramCollection, Vec<IndexEntry>) {
        let ctx = ViewportCtx::for_range(3, 0.0, 3.0, 4).unwrap();
        let coll = HistogramCollection::new(3, &palette(2), 4);
        let disc = ctx.discretizer().unwrap();
        let pixel = [0.4, 1.6, 3.9];
        coll[1].add(disc.discretize(&pixel), &pixel);
        let entries = vec![(1, DiscreteKey::new(vec![0, 2, 3]))];
        (ctx, coll, entries)
    }

    #[test]
    fn bin_center_placement() {
        let (ctx, coll, entries) = scenario();
        let buffer =
            generate_vertices(&ctx, &coll, &entries, &VertexOptions::default(), &Epoch::detached()).unwrap();
        let ys: Vec<f32> = buffer.as_slice().iter().map(|v| v.y).collect();
        assert_eq!(ys, vec![0.5, 2.5, 3.5]);
        let xs: Vec<f32> = buffer.as_slice().iter().map(|v| v.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
        assert!(buffer.as_slice().iter().all(|v| v.opacity == 1.0));
        assert!(buffer.as_slice().iter().all(|v| v.color == palette(2)[1].0));
    }

    #[test]
    fn mean_placement_with_illuminant() {
        let (ctx, coll, entries) = scenario();
        let options = VertexOptions {
            draw_means: true,
            illuminant_correction: true,
            illuminant: vec![0.4, 0.6, 0.9],
            color_mode: ColorMode::Mean,
            ..VertexOptions::default()
        };
        let buffer = generate_vertices(&ctx, &coll, &entries, &options, &Epoch::detached()).unwrap();
        let v = buffer.as_slice();
        assert_abs_diff_eq!(v[0].y, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[1].y, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v[2].y, 3.0, epsilon = 1e-6);
        let expected = coll[1].with_bin(&entries[0].1, |b| b.display_color(ctx.meta(), 3.0)).unwrap();
        assert_eq!(v[0].color, expected.0);
    }

    #[test]
    fn never_writes_past_its_region() {
        let (ctx, coll, entries) = scenario();
        let sentinel = Vertex { x: -1.0, y: -1.0, color: [1, 2, 3, 4], opacity: -1.0 };
        let mut out = vec![sentinel; 7];
        let written =
            store_vertices(&ctx, &coll, &entries, &mut out, &VertexOptions::default(), &Epoch::detached());
        assert_eq!(written, Ok(1));
        assert!(out[..3].iter().all(|v| *v != sentinel));
        assert!(out[3..].iter().all(|v| *v == sentinel));
    }

    #[test]
    fn undersized_buffer_is_rejected_before_writing() {
        let (ctx, coll, entries) = scenario();
        let mut out = vec![Vertex::default(); 2];
        let result = store_vertices(&ctx, &coll, &entries, &mut out, &VertexOptions::default(), &Epoch::detached());
        assert_eq!(result, Err(VertexError::BufferTooSmall { required: 3, capacity: 2 }));
        assert_ne!(status_code(&result), 0);
        assert!(out.iter().all(|v| *v == Vertex::default()));
    }

    #[test]
    fn malformed_input_reports_codes() {
        let (ctx, coll, _) = scenario();
        let opts = VertexOptions::default();
        let epoch = Epoch::detached();

        let bad_label = vec![(5, DiscreteKey::new(vec![0, 0, 0]))];
        let result = generate_vertices(&ctx, &coll, &bad_label, &opts, &epoch);
        assert_eq!(result.unwrap_err(), VertexError::BadLabel(5));

        let short_key = vec![(1, DiscreteKey::new(vec![0, 2]))];
        let result = generate_vertices(&ctx, &coll, &short_key, &opts, &epoch);
        assert!(matches!(result, Err(VertexError::DimensionMismatch { got: 2, .. })));

        let missing = vec![(1, DiscreteKey::new(vec![3, 3, 3]))];
        let result = generate_vertices(&ctx, &coll, &missing, &opts, &epoch);
        assert_eq!(result.unwrap_err(), VertexError::MissingBin(1));

        let other_ctx = ViewportCtx::for_range(4, 0.0, 3.0, 4).unwrap();
        let result = generate_vertices(&other_ctx, &coll, &[], &opts, &epoch);
        assert!(matches!(result, Err(VertexError::DimensionMismatch { expected: 4, got: 3, .. })));

        let illum = VertexOptions { illuminant_correction: true, illuminant: vec![1.0], ..opts };
        let result = generate_vertices(&ctx, &coll, &[], &illum, &epoch);
        assert_eq!(result.unwrap_err().code(), 5);
    }

    #[test]
    fn oversized_batch_is_one_work_item() {
        let (ctx, coll, entries) = scenario();
        let expected =
            generate_vertices(&ctx, &coll, &entries, &VertexOptions::default(), &Epoch::detached()).unwrap();
        let options = VertexOptions { batch: usize::MAX, ..VertexOptions::default() };
        let buffer = generate_vertices(&ctx, &coll, &entries, &options, &Epoch::detached()).unwrap();
        assert_eq!(buffer.as_slice(), expected.as_slice());
    }

    #[test]
    fn stale_epoch_aborts() {
        let (ctx, coll, entries) = scenario();
        let generation = Generation::new();
        let epoch = generation.epoch();
        generation.bump_wait();
        let result = generate_vertices(&ctx, &coll, &entries, &VertexOptions::default(), &epoch);
        assert_eq!(result.unwrap_err(), VertexError::Cancelled(Cancelled));
    }

    #[test]
    fn thread_count_does_not_change_the_buffer() {
        let ctx = ViewportCtx::for_range(6, 0.0, 1.0, 32).unwrap();
        let disc = ctx.discretizer().unwrap();
        let coll = HistogramCollection::new(6, &palette(3), 8);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..4000 {
            let pixel: Vec<f32> = (0..6).map(|_| rng.gen_range(0.0..1.0f32)).collect();
            coll[rng.gen_range(0..3)].add(disc.discretize(&pixel), &pixel);
        }
        let mut entries: Vec<IndexEntry> = Vec::new();
        for (label, set) in coll.iter().enumerate() {
            for shard in set.shards() {
                entries.extend(shard.read().keys().map(|k| (label, k.clone())));
            }
        }
        let options = VertexOptions { draw_means: true, color_mode: ColorMode::Mean, batch: 7, ..VertexOptions::default() };
        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            pool.install(|| generate_vertices(&ctx, &coll, &entries, &options, &Epoch::detached()).unwrap())
        };
        let single = run(1);
        let multi = run(6);
        assert_eq!(single.len(), entries.len() * 6);
        assert_eq!(single.as_slice(), multi.as_slice());
    }
}
