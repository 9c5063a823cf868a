// THEORY:
// A `Bin` is the accumulator behind one cell of the sparse histogram. Every pixel
// whose discretized key matches the cell is folded into it: the weight counts the
// pixels and `means` keeps the component-wise running sum of their vectors.
//
// Key architectural principles:
// 1.  **Deferred Normalization**: `means` is never divided by `weight` in place. The
//     true mean is computed on read, so adding and removing a pixel are exact
//     inverses and no precision drifts in over long labeling sessions.
// 2.  **Fixed Dimensionality**: `means` is empty until the first `add` and has the
//     pixel dimensionality from then on.
// 3.  **Lazy Color**: the display color depends on the mean, which changes with every
//     update. It is computed on first use and forgotten whenever the bin changes.
//
// A `Bin` is a "dumb" container. It knows nothing about its key or the
// label it belongs to; the `LabelHistogram` owns that mapping.

pub mod bin {
    use crate::core_modules::color::mean_color;
    use crate::core_modules::viewport::BandDesc;
    use image::Rgba;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Default)]
    pub struct Bin {
        /// Number of pixels folded into this bin.
        pub weight: f32,
        /// Running, unnormalized sum of all folded pixel vectors.
        pub means: Vec<f32>,
        color: OnceLock<Rgba<u8>>,
    }

    impl Bin {
        pub fn new() -> Self {
            Self::default()
        }

        #[inline]
        pub fn add(&mut self, pixel: &[f32]) {
            self.weight += 1.0;
            if self.means.is_empty() {
                self.means.resize(pixel.len(), 0.0);
            }
            debug_assert_eq!(self.means.len(), pixel.len());
            for (m, &p) in self.means.iter_mut().zip(pixel) {
                *m += p;
            }
            self.color = OnceLock::new();
        }

        /// Removes a pixel that was previously added.
        ///
        /// # Panics
        /// If the bin never received an `add`; the caller emitted a remove without a
        /// matching add.
        #[inline]
        pub fn sub(&mut self, pixel: &[f32]) {
            assert!(!self.means.is_empty(), "Bin::sub on a bin that was never populated");
            debug_assert_eq!(self.means.len(), pixel.len());
            self.weight -= 1.0;
            for (m, &p) in self.means.iter_mut().zip(pixel) {
                *m -= p;
            }
            self.color = OnceLock::new();
        }

        pub fn dimensionality(&self) -> usize {
            self.means.len()
        }

        /// Normalized mean of dimension `d`.
        #[inline]
        pub fn mean_at(&self, d: usize) -> f32 {
            self.means[d] / self.weight
        }

        /// The true mean pixel vector of this bin.
        pub fn mean(&self) -> Vec<f32> {
            self.means.iter().map(|m| m / self.weight).collect()
        }

        pub fn display_color(&self, meta: &[BandDesc], maxval: f32) -> Rgba<u8> {
            *self.color.get_or_init(|| mean_color(&self.mean(), meta, maxval))
        }

        pub fn cached_color(&self) -> Option<Rgba<u8>> {
            self.color.get().copied()
        }
    }
}
