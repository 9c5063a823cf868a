// THEORY:
// The `pipeline` module runs one redraw epoch. A redraw is the two parallel passes
// in order: the range reducer over every label, then the vertex generator over the
// flat index the reducer produced. Both passes work on immutable snapshots (the
// viewport context and the published histogram collection), so a redraw never sees
// the producer's in-progress edits.
//
// A request remembers the epoch it was made in. The epoch is checked inside both
// passes and once more between and after them; as soon as the configuration layer
// bumps the generation, the redraw stops and reports `Cancelled`, and whatever it had
// computed is dropped.

use crate::config::EngineConfig;
use crate::core_modules::bin_set::Boundary;
use crate::core_modules::collection::HistogramCollection;
use crate::core_modules::range_reducer::{ReduceParams, Shuffle, prepare_polylines};
use crate::core_modules::vertex_generator::{VertexBuffer, VertexOptions, generate_vertices};
use crate::core_modules::viewport::{Epoch, Generation, ViewportCtx};
use crate::errors::RedrawError;
use log::debug;
use std::sync::Arc;

/// Everything one redraw needs.
#[derive(Debug, Clone)]
pub struct RedrawRequest {
    pub ctx: Arc<ViewportCtx>,
    pub sets: Arc<HistogramCollection>,
    pub reduce: ReduceParams,
    pub vertex: VertexOptions,
    pub epoch: Epoch,
}

/// The product of a completed redraw.
#[derive(Debug, Clone)]
pub struct Frame {
    pub vertices: VertexBuffer,
    /// Per-label occupied bin range, indexed by label.
    pub boundaries: Vec<Boundary>,
    /// Number of polylines in `vertices`.
    pub bins: usize,
    pub dimensionality: usize,
    pub epoch: Epoch,
}

impl Frame {
    pub fn empty() -> Self {
        Self {
            vertices: VertexBuffer::new(),
            boundaries: Vec::new(),
            bins: 0,
            dimensionality: 0,
            epoch: Epoch::detached(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedrawPipeline {
    config: EngineConfig,
    generation: Arc<Generation>,
}

impl RedrawPipeline {
    pub fn new(config: EngineConfig, generation: Arc<Generation>) -> Self {
        Self { config, generation }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    pub fn reduce_params(&self) -> ReduceParams {
        let shuffle = match (self.config.shuffle, self.config.shuffle_seed) {
            (false, _) => Shuffle::Off,
            (true, Some(seed)) => Shuffle::Seeded(seed),
            (true, None) => Shuffle::Random,
        };
        ReduceParams {
            min_weight: self.config.min_weight,
            shuffle,
            ..ReduceParams::default()
        }
    }

    pub fn vertex_options(&self) -> VertexOptions {
        VertexOptions {
            batch: self.config.vertex_batch,
            ..VertexOptions::default()
        }
    }

    /// A request with the configured defaults, bound to the current epoch.
    pub fn request(&self, ctx: Arc<ViewportCtx>, sets: Arc<HistogramCollection>) -> RedrawRequest {
        RedrawRequest {
            ctx,
            sets,
            reduce: self.reduce_params(),
            vertex: self.vertex_options(),
            epoch: self.generation.epoch(),
        }
    }

    /// Runs both passes on the calling thread's rayon pool.
    pub fn redraw(&self, request: &RedrawRequest) -> Result<Frame, RedrawError> {
        let epoch = &request.epoch;
        epoch.check()?;
        let prepared = prepare_polylines(&request.ctx, &request.sets, &request.reduce, epoch)?;
        epoch.check()?;

        let vertices = generate_vertices(
            &request.ctx,
            &request.sets,
            &prepared.entries,
            &request.vertex,
            epoch,
        )?;
        epoch.check()?;

        let (wait, reset) = epoch.markers();
        debug!(
            "redraw of {:?} at generation {wait}/{reset}: {} polylines, {} vertices",
            request.ctx.representation,
            prepared.entries.len(),
            vertices.len()
        );
        Ok(Frame {
            vertices,
            boundaries: prepared.boundaries,
            bins: prepared.entries.len(),
            dimensionality: request.sets.dimensionality(),
            epoch: epoch.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::collection::palette;
    use crate::core_modules::discretizer::DiscreteKey;
    use crate::errors::Cancelled;

    fn setup() -> (RedrawPipeline, Arc<ViewportCtx>, Arc<HistogramCollection>) {
        let config = EngineConfig::default().shuffle(false);
        let pipeline = RedrawPipeline::new(config, Generation::new());
        let ctx = Arc::new(ViewportCtx::for_range(3, 0.0, 3.0, 4).unwrap());
        let coll = HistogramCollection::new(3, &palette(2), 4);
        coll[0].add(DiscreteKey::new(vec![0, 0, 0]), &[0.0, 0.0, 0.0]);
        coll[1].add(DiscreteKey::new(vec![0, 2, 3]), &[0.4, 1.6, 3.9]);
        coll[1].add(DiscreteKey::new(vec![1, 1, 1]), &[1.0, 1.0, 1.0]);
        (pipeline, ctx, Arc::new(coll))
    }

    #[test]
    fn redraw_produces_a_complete_frame() {
        let (pipeline, ctx, sets) = setup();
        let frame = pipeline.redraw(&pipeline.request(ctx, sets)).unwrap();
        assert_eq!(frame.bins, 3);
        assert_eq!(frame.vertices.len(), 9);
        assert_eq!(frame.dimensionality, 3);
        assert_eq!(frame.boundaries[1], vec![(0, 1), (1, 2), (1, 3)]);
        assert_eq!(frame.boundaries[0], vec![(0, 0); 3]);
    }

    #[test]
    fn stale_request_is_cancelled() {
        let (pipeline, ctx, sets) = setup();
        let request = pipeline.request(ctx, Arc::clone(&sets));
        pipeline.generation().bump_wait();
        let result = pipeline.redraw(&request);
        assert_eq!(result.unwrap_err(), RedrawError::Cancelled(Cancelled));
        // Boundaries of a cancelled pass are never written.
        assert_eq!(sets[1].boundary(), vec![(255, 0); 3]);
    }

    #[test]
    fn config_shapes_params() {
        let config = EngineConfig::default().min_weight(2.0).shuffle_seed(5).vertex_batch(16);
        let pipeline = RedrawPipeline::new(config, Generation::new());
        let params = pipeline.reduce_params();
        assert_eq!(params.min_weight, 2.0);
        assert_eq!(params.shuffle, Shuffle::Seeded(5));
        assert_eq!(pipeline.vertex_options().batch, 16);
    }
}
