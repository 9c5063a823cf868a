// THEORY:
// A bin's display color is a rough sRGB rendition of its mean vector, used when the
// view colors polylines by content rather than by label. Three strategies, picked by
// what the band metadata allows:
//
// - Spectral: every band has a center wavelength. Each band contributes its value
//   weighted by the CIE 1931 color matching functions (multi-lobe Gaussian fit), the
//   resulting XYZ is converted to linear sRGB and gamma encoded.
// - RGB: exactly three bands and no wavelengths. The vector already is a color.
// - Gray: anything else. The mean intensity becomes a gray level.
//
// All inputs are normalized by `maxval` first, so the result is independent of the
// image's value scale.

use crate::core_modules::viewport::BandDesc;
use image::Rgba;

/// Gaussian with different widths left and right of the peak.
#[inline]
fn lobe(lambda: f32, mu: f32, sigma_left: f32, sigma_right: f32) -> f32 {
    let sigma = if lambda < mu { sigma_left } else { sigma_right };
    let t = (lambda - mu) / sigma;
    (-0.5 * t * t).exp()
}

/// CIE 1931 2° observer color matching functions at `lambda` nanometers.
pub fn cie_xyz(lambda: f32) -> (f32, f32, f32) {
    let x = 1.056 * lobe(lambda, 599.8, 37.9, 31.0) + 0.362 * lobe(lambda, 442.0, 16.0, 26.7)
        - 0.065 * lobe(lambda, 501.1, 20.4, 26.2);
    let y = 0.821 * lobe(lambda, 568.8, 46.9, 40.5) + 0.286 * lobe(lambda, 530.9, 16.3, 31.1);
    let z = 1.217 * lobe(lambda, 437.0, 11.8, 36.0) + 0.681 * lobe(lambda, 459.0, 26.0, 13.8);
    (x, y, z)
}

#[inline]
fn srgb_encode(linear: f32) -> u8 {
    let c = linear.clamp(0.0, 1.0);
    let encoded = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

#[inline]
fn unit_to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn spectral(mean: &[f32], wavelengths: &[f32], maxval: f32) -> Rgba<u8> {
    let (mut x, mut y, mut z, mut norm) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for (&v, &lambda) in mean.iter().zip(wavelengths) {
        let (cx, cy, cz) = cie_xyz(lambda);
        let v = v / maxval;
        x += v * cx;
        y += v * cy;
        z += v * cz;
        norm += cy;
    }
    if norm <= f32::EPSILON {
        return Rgba([0, 0, 0, 255]);
    }
    let (x, y, z) = (x / norm, y / norm, z / norm);
    let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g = -0.969_266 * x + 1.876_010_8 * y + 0.041_556 * z;
    let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;
    Rgba([srgb_encode(r), srgb_encode(g), srgb_encode(b), 255])
}

/// Display color for a normalized mean vector.
pub fn mean_color(mean: &[f32], meta: &[BandDesc], maxval: f32) -> Rgba<u8> {
    let maxval = if maxval > 0.0 { maxval } else { 1.0 };

    if meta.len() == mean.len() && !mean.is_empty() {
        let wavelengths: Option<Vec<f32>> = meta.iter().map(|b| b.wavelength).collect();
        if let Some(wavelengths) = wavelengths {
            return spectral(mean, &wavelengths, maxval);
        }
    }

    if mean.len() == 3 {
        return Rgba([
            unit_to_byte(mean[0] / maxval),
            unit_to_byte(mean[1] / maxval),
            unit_to_byte(mean[2] / maxval),
            255,
        ]);
    }

    if mean.is_empty() {
        return Rgba([0, 0, 0, 255]);
    }
    let level = unit_to_byte(mean.iter().sum::<f32>() / mean.len() as f32 / maxval);
    Rgba([level, level, level, 255])
}
