// THEORY:
// The `Discretizer` is the one place where continuous pixel values become integer
// bin coordinates. Both sides of the engine depend on it: the producer uses it to
// decide which `Bin` a pixel folds into, and the consumer recomputes axis positions
// from the resulting keys. It is therefore a pure, copyable value with no hidden
// state; two discretizers built from the same parameters always agree bit for bit.
//
// A `DiscreteKey` stores one byte per dimension, which caps the bin count at 256.
// Equality and hashing run over the whole byte sequence.

use crate::errors::ContextError;
use std::fmt;
use std::ops::Deref;

pub const MAX_BINS: usize = 256;

/// One discretized pixel vector: a bin index per dimension.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscreteKey(Box<[u8]>);

impl DiscreteKey {
    pub fn new(indices: Vec<u8>) -> Self {
        Self(indices.into_boxed_slice())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for DiscreteKey {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for DiscreteKey {
    fn from(indices: &[u8]) -> Self {
        Self(indices.into())
    }
}

impl fmt::Debug for DiscreteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscreteKey{:?}", &*self.0)
    }
}

/// Maps values in `[minval, minval + (nbins - 1) * binsize]` onto `0..nbins`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discretizer {
    minval: f32,
    binsize: f32,
    nbins: usize,
}

impl Discretizer {
    pub fn new(minval: f32, binsize: f32, nbins: usize) -> Result<Self, ContextError> {
        if nbins == 0 || nbins > MAX_BINS {
            return Err(ContextError::BinCount(nbins));
        }
        if !binsize.is_finite() || binsize <= 0.0 {
            return Err(ContextError::BinSize(binsize));
        }
        if !minval.is_finite() {
            return Err(ContextError::Invalid("minval"));
        }
        Ok(Self { minval, binsize, nbins })
    }

    /// Spreads `nbins` steps over the value range so that `minval` and `maxval`
    /// land exactly on the first and last bin.
    pub fn from_range(minval: f32, maxval: f32, nbins: usize) -> Result<Self, ContextError> {
        if nbins == 0 || nbins > MAX_BINS {
            return Err(ContextError::BinCount(nbins));
        }
        let range = maxval - minval;
        let binsize = if nbins == 1 {
            if range > 0.0 { range } else { 1.0 }
        } else {
            range / (nbins - 1) as f32
        };
        Self::new(minval, binsize, nbins)
    }

    pub fn minval(&self) -> f32 {
        self.minval
    }

    pub fn binsize(&self) -> f32 {
        self.binsize
    }

    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// `clamp(round((value - minval) / binsize), 0, nbins - 1)`. NaN lands in bin 0.
    #[inline]
    pub fn index(&self, value: f32) -> u8 {
        let top = (self.nbins - 1) as f32;
        // `as` saturates and maps NaN to zero.
        ((value - self.minval) / self.binsize).round().clamp(0.0, top) as u8
    }

    pub fn discretize(&self, pixel: &[f32]) -> DiscreteKey {
        DiscreteKey(pixel.iter().map(|&v| self.index(v)).collect())
    }

    /// Value at the middle of bin `index`, used as the axis position in bin-center mode.
    #[inline]
    pub fn bin_center(&self, index: u8) -> f32 {
        self.minval + index as f32 * self.binsize + self.binsize / 2.0
    }
}
