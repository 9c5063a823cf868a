// THEORY:
// The `HistogramCollection` is the ordered set of label histograms for one image:
// index 0 holds the unlabeled pixels, every other index one user label. All members
// share the same dimensionality for the lifetime of the collection.
//
// The collection is what gets published to the drawing side. The producer mutates
// its own working copy; readers only ever receive complete, cloned snapshots
// through `Shared`, so a reader never sees a half-applied batch of label changes.

use crate::core_modules::bin_set::{Boundary, LabelHistogram};
use image::Rgba;
use std::ops::Index;

pub const UNLABELED: usize = 0;

#[derive(Debug, Clone)]
pub struct HistogramCollection {
    sets: Vec<LabelHistogram>,
    dimensionality: usize,
    shards: usize,
}

impl HistogramCollection {
    pub fn new(dimensionality: usize, label_colors: &[Rgba<u8>], shards: usize) -> Self {
        let sets = label_colors
            .iter()
            .map(|&color| LabelHistogram::new(color, dimensionality, shards))
            .collect();
        Self { sets, dimensionality, shards }
    }

    /// Appends histograms for labels that were added since the collection was built.
    /// Existing histograms are left untouched.
    pub fn ensure_labels(&mut self, label_colors: &[Rgba<u8>]) {
        for &color in label_colors.iter().skip(self.sets.len()) {
            self.sets.push(LabelHistogram::new(color, self.dimensionality, self.shards));
        }
    }

    pub fn get(&self, label: usize) -> Option<&LabelHistogram> {
        self.sets.get(label)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabelHistogram> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn bin_count(&self) -> usize {
        self.sets.iter().map(LabelHistogram::len).sum()
    }

    pub fn total_weight(&self) -> i64 {
        self.sets.iter().map(LabelHistogram::total_weight).sum()
    }

    pub fn boundaries(&self) -> Vec<Boundary> {
        self.sets.iter().map(LabelHistogram::boundary).collect()
    }

    pub fn clear(&self) {
        for set in &self.sets {
            set.clear();
        }
    }
}

impl Index<usize> for HistogramCollection {
    type Output = LabelHistogram;

    fn index(&self, label: usize) -> &LabelHistogram {
        &self.sets[label]
    }
}

impl<'a> IntoIterator for &'a HistogramCollection {
    type Item = &'a LabelHistogram;
    type IntoIter = std::slice::Iter<'a, LabelHistogram>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}

/// Label colors for `count` labels: light gray for unlabeled, evenly spaced hues after.
pub fn palette(count: usize) -> Vec<Rgba<u8>> {
    let labeled = count.saturating_sub(1).max(1) as f32;
    (0..count)
        .map(|i| {
            if i == UNLABELED {
                return Rgba([200, 200, 200, 255]);
            }
            let hue = (i - 1) as f32 / labeled * 6.0;
            let x = 1.0 - ((hue % 2.0) - 1.0).abs();
            let (r, g, b) = match hue as u32 {
                0 => (1.0, x, 0.0),
                1 => (x, 1.0, 0.0),
                2 => (0.0, 1.0, x),
                3 => (0.0, x, 1.0),
                4 => (x, 0.0, 1.0),
                _ => (1.0, 0.0, x),
            };
            Rgba([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8, 255])
        })
        .collect()
}
