// THEORY:
// The `ViewportCtx` is the contract between the binning side and the drawing side.
// Both must agree on dimensionality, value range and bin layout, otherwise a key
// produced by one would be placed wrongly by the other. The context is owned by the
// configuration layer; this crate only ever reads published snapshots of it.
//
// Every field carries its own validity. A field that is `None` has not been computed
// yet (e.g. the value range of an image that is still loading); passes that need it
// fail with `ContextError::Invalid` instead of guessing.
//
// The `wait`/`reset` epoch counters cannot live inside the immutable snapshot: an
// in-flight pass must be able to see them advance. They are kept in a separate,
// shared `Generation`, and a pass captures an `Epoch` when it starts.

use crate::core_modules::discretizer::Discretizer;
use crate::errors::{Cancelled, ContextError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Description of one band (dimension) of the image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BandDesc {
    pub name: String,
    pub unit: String,
    /// Center wavelength in nanometers, if the band is spectral.
    pub wavelength: Option<f32>,
}

impl BandDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_wavelength(name: impl Into<String>, wavelength: f32) -> Self {
        Self {
            name: name.into(),
            unit: "nm".to_string(),
            wavelength: Some(wavelength),
        }
    }
}

/// Which derived image the view is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Representation {
    #[default]
    Image,
    Gradient,
    ImagePca,
    GradientPca,
}

#[derive(Debug, Clone, Default)]
pub struct ViewportCtx {
    pub representation: Representation,
    pub dimensionality: Option<usize>,
    pub nbins: Option<usize>,
    pub binsize: Option<f32>,
    pub minval: Option<f32>,
    pub maxval: Option<f32>,
    pub meta: Option<Vec<BandDesc>>,
    pub labels: Option<Vec<String>>,
    /// All pixels are binned as unlabeled.
    pub ignore_labels: bool,
}

impl ViewportCtx {
    /// A fully valid context for `dimensionality` bands spread over `[minval, maxval]`.
    pub fn for_range(
        dimensionality: usize,
        minval: f32,
        maxval: f32,
        nbins: usize,
    ) -> Result<Self, ContextError> {
        let disc = Discretizer::from_range(minval, maxval, nbins)?;
        Ok(Self {
            dimensionality: Some(dimensionality),
            nbins: Some(nbins),
            binsize: Some(disc.binsize()),
            minval: Some(minval),
            maxval: Some(maxval),
            meta: Some(vec![BandDesc::default(); dimensionality]),
            labels: Some(vec!["unlabeled".to_string()]),
            ..Self::default()
        })
    }

    pub fn with_meta(mut self, meta: Vec<BandDesc>) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn dimensionality(&self) -> Result<usize, ContextError> {
        self.dimensionality.ok_or(ContextError::Invalid("dimensionality"))
    }

    pub fn maxval(&self) -> Result<f32, ContextError> {
        self.maxval.ok_or(ContextError::Invalid("maxval"))
    }

    /// The discretizer both sides must share.
    pub fn discretizer(&self) -> Result<Discretizer, ContextError> {
        let nbins = self.nbins.ok_or(ContextError::Invalid("nbins"))?;
        let binsize = self.binsize.ok_or(ContextError::Invalid("binsize"))?;
        let minval = self.minval.ok_or(ContextError::Invalid("minval"))?;
        Discretizer::new(minval, binsize, nbins)
    }

    /// Band metadata, or an empty slice while it is not valid.
    pub fn meta(&self) -> &[BandDesc] {
        self.meta.as_deref().unwrap_or(&[])
    }

    pub fn label_name(&self, label: usize) -> Option<&str> {
        self.labels.as_ref()?.get(label).map(String::as_str)
    }
}

/// Epoch counters shared by the configuration layer and every in-flight pass.
#[derive(Debug, Default)]
pub struct Generation {
    wait: AtomicU64,
    reset: AtomicU64,
}

impl Generation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Signals that a new context is being prepared; running passes become stale.
    pub fn bump_wait(&self) -> u64 {
        self.wait.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Signals that bins were reset; running passes become stale.
    pub fn bump_reset(&self) -> u64 {
        self.reset.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn wait(&self) -> u64 {
        self.wait.load(Ordering::Acquire)
    }

    pub fn reset(&self) -> u64 {
        self.reset.load(Ordering::Acquire)
    }

    pub fn epoch(self: &Arc<Self>) -> Epoch {
        Epoch {
            wait: self.wait(),
            reset: self.reset(),
            generation: Arc::clone(self),
        }
    }
}

/// The generation a pass started in. Checked at every batch boundary.
#[derive(Debug, Clone)]
pub struct Epoch {
    generation: Arc<Generation>,
    wait: u64,
    reset: u64,
}

impl Epoch {
    /// An epoch nobody else can advance, for one-shot passes.
    pub fn detached() -> Self {
        Generation::new().epoch()
    }

    pub fn is_current(&self) -> bool {
        self.generation.wait() == self.wait && self.generation.reset() == self.reset
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_current() { Ok(()) } else { Err(Cancelled) }
    }

    pub fn markers(&self) -> (u64, u64) {
        (self.wait, self.reset)
    }
}
