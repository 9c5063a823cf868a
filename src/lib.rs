// THEORY:
// `distview` turns a multi-band image into a parallel-coordinates view without
// drawing one line per pixel. Pixels are discretized into byte keys and accumulated
// in one sparse concurrent histogram per label; a redraw then reduces those
// histograms into a flat list of visible bins and expands every bin into one
// polyline of floating-point vertices.
//
// The public surface is small: the `Binner` on the producer side, the
// `RedrawPipeline` / `ComputeWorker` on the consumer side, and the snapshot types
// passed between them. The building blocks live in `core_modules` and stay public so
// embedders can run the passes themselves.

pub mod config;
pub mod core_modules;
pub mod errors;
pub mod parallel_pipeline;
pub mod pipeline;

pub use crate::config::EngineConfig;
pub use crate::core_modules::binning::{Binner, LabelEvent, Op};
pub use crate::core_modules::collection::{HistogramCollection, palette};
pub use crate::core_modules::utils::image_helper::image_helper::MultiImage;
pub use crate::core_modules::vertex_generator::{ColorMode, Vertex, VertexBuffer, VertexOptions};
pub use crate::core_modules::viewport::{BandDesc, Epoch, Generation, ViewportCtx};
pub use crate::errors::{RedrawError, VertexError, status_code};
pub use crate::parallel_pipeline::ComputeWorker;
pub use crate::pipeline::{Frame, RedrawPipeline, RedrawRequest};
