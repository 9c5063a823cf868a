// THEORY:
// Every failure the engine can report lives here, grouped by the pass that raises it.
// Per-bin filtering decisions are never errors; they only shape the output. What is
// left are cross-cutting failures that abort a whole pass (dimensionality mismatch,
// undersized output, bad context) and the cooperative `Cancelled` signal, which is
// not a failure at all but still has to travel through `Result` so the caller can
// drop whatever the stale epoch produced.

use thiserror::Error;

/// A stale epoch was detected; the partial output has been discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("computation abandoned: viewport generation changed")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("viewport field `{0}` is not valid")]
    Invalid(&'static str),
    #[error("nbins must be in 1..=256, got {0}")]
    BinCount(usize),
    #[error("binsize must be finite and positive, got {0}")]
    BinSize(f32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinningError {
    #[error("pixel has {got} components, histogram expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("label {label} does not exist ({count} labels)")]
    UnknownLabel { label: usize, count: usize },
    #[error("label map has {got} entries, image has {expected} pixels")]
    LabelMapSize { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    #[error("label {label} holds a key of length {got}, viewport dimensionality is {expected}")]
    DimensionMismatch { label: usize, expected: usize, got: usize },
    #[error("limiters cover {got} dimensions, viewport dimensionality is {expected}")]
    Limiters { expected: usize, got: usize },
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VertexError {
    #[error("bin of label {label} has dimensionality {got}, viewport expects {expected}")]
    DimensionMismatch { label: usize, expected: usize, got: usize },
    #[error("vertex buffer holds {capacity} vertices, {required} required")]
    BufferTooSmall { required: usize, capacity: usize },
    #[error("index refers to label {0} which is not in the collection")]
    BadLabel(usize),
    #[error("index refers to a bin missing from label {0}")]
    MissingBin(usize),
    #[error("illuminant has {got} entries, viewport dimensionality is {expected}")]
    Illuminant { expected: usize, got: usize },
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl VertexError {
    /// Numeric code exposed to diagnostics. Zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            VertexError::DimensionMismatch { .. } => 1,
            VertexError::BufferTooSmall { .. } => 2,
            VertexError::BadLabel(_) => 3,
            VertexError::MissingBin(_) => 4,
            VertexError::Illuminant { .. } => 5,
            VertexError::Context(_) => 6,
            VertexError::Cancelled(_) => 7,
        }
    }
}

/// Collapses a generation result into the 0 / non-zero status code.
pub fn status_code<T>(result: &Result<T, VertexError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => err.code(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RedrawError {
    #[error("range reduction failed: {0}")]
    Range(RangeError),
    #[error("vertex generation failed: {0}")]
    Vertex(VertexError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("compute worker is gone")]
    WorkerGone,
}

impl RedrawError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RedrawError::Cancelled(_))
    }
}

// Cancellation is lifted out of the pass-specific enums so callers match it once.
impl From<RangeError> for RedrawError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::Cancelled(c) => RedrawError::Cancelled(c),
            other => RedrawError::Range(other),
        }
    }
}

impl From<VertexError> for RedrawError {
    fn from(err: VertexError) -> Self {
        match err {
            VertexError::Cancelled(c) => RedrawError::Cancelled(c),
            other => RedrawError::Vertex(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("shard count must be a power of two, got {0}")]
    Shards(usize),
    #[error("vertex batch size must be at least 1")]
    VertexBatch,
    #[error("min_weight must be finite and non-negative, got {0}")]
    MinWeight(f32),
    #[error("environment variable {name} has an invalid value `{value}`")]
    Env { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_maps_to_zero() {
        let ok: Result<usize, VertexError> = Ok(12);
        assert_eq!(status_code(&ok), 0);
    }

    #[test]
    fn every_failure_is_non_zero() {
        let errors = [
            VertexError::DimensionMismatch { label: 0, expected: 3, got: 4 },
            VertexError::BufferTooSmall { required: 9, capacity: 3 },
            VertexError::BadLabel(4),
            VertexError::MissingBin(1),
            VertexError::Illuminant { expected: 3, got: 2 },
            VertexError::Context(ContextError::Invalid("binsize")),
            VertexError::Cancelled(Cancelled),
        ];
        for err in errors {
            assert_ne!(status_code::<()>(&Err(err)), 0);
        }
    }

    #[test]
    fn cancellation_is_lifted() {
        let err: RedrawError = RangeError::Cancelled(Cancelled).into();
        assert!(err.is_cancelled());
        let err: RedrawError = VertexError::BadLabel(2).into();
        assert!(!err.is_cancelled());
    }
}
