// THEORY:
// Glue between the `image` crate and the engine. Images come in as interleaved
// 8-bit RGB and are turned into a `MultiImage`: a band-interleaved `f32` buffer, the
// representation the binning side consumes. Finished vertex buffers go out as a
// plain raster plot, one anti-aliasing-free line per polyline segment, alpha blended
// by bin opacity.

pub mod image_helper {
    use crate::core_modules::vertex_generator::Vertex;
    use image::{ImageEncoder, Rgba, RgbaImage, RgbImage};

    /// A multi-band image stored pixel-interleaved as `f32`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct MultiImage {
        pub width: u32,
        pub height: u32,
        pub bands: usize,
        pub data: Vec<f32>,
    }

    impl MultiImage {
        pub fn new(width: u32, height: u32, bands: usize, data: Vec<f32>) -> Option<Self> {
            if data.len() != width as usize * height as usize * bands {
                return None;
            }
            Some(Self { width, height, bands, data })
        }

        /// Three bands with values in `[0, 255]`.
        pub fn from_rgb(rgb: &RgbImage) -> Self {
            let data = rgb.as_raw().iter().map(|&c| c as f32).collect();
            Self { width: rgb.width(), height: rgb.height(), bands: 3, data }
        }

        pub fn pixel_count(&self) -> usize {
            self.width as usize * self.height as usize
        }

        pub fn pixel(&self, i: usize) -> &[f32] {
            &self.data[i * self.bands..(i + 1) * self.bands]
        }

        /// One slice per image row.
        pub fn rows(&self) -> std::slice::Chunks<'_, f32> {
            self.data.chunks(self.width as usize * self.bands.max(1))
        }
    }

    /// Label 1 for pixels whose mean band value exceeds `threshold`, label 0 otherwise.
    pub fn threshold_labels(image: &MultiImage, threshold: f32) -> Vec<usize> {
        (0..image.pixel_count())
            .map(|i| {
                let px = image.pixel(i);
                let mean = px.iter().sum::<f32>() / px.len().max(1) as f32;
                usize::from(mean > threshold)
            })
            .collect()
    }

    /// Plot geometry: where the axes sit and which value range maps to the height.
    #[derive(Debug, Clone, Copy)]
    pub struct PlotFrame {
        pub width: u32,
        pub height: u32,
        pub margin: u32,
        pub minval: f32,
        pub maxval: f32,
    }

    impl PlotFrame {
        fn project(&self, dimensionality: usize, v: &Vertex) -> (i64, i64) {
            let inset = self.margin.saturating_mul(2);
            let span_x = self.width.saturating_sub(inset) as f32;
            let span_y = self.height.saturating_sub(inset) as f32;
            let axes = dimensionality.saturating_sub(1).max(1) as f32;
            let range = (self.maxval - self.minval).max(f32::EPSILON);
            let x = self.margin as f32 + v.x / axes * span_x;
            let t = ((v.y - self.minval) / range).clamp(0.0, 1.0);
            let y = self.margin as f32 + (1.0 - t) * span_y;
            (x.round() as i64, y.round() as i64)
        }
    }

    fn blend(img: &mut RgbaImage, x: i64, y: i64, color: [u8; 4], alpha: f32) {
        if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
            return;
        }
        let dst = img.get_pixel_mut(x as u32, y as u32);
        for c in 0..3 {
            let mixed = dst.0[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
            dst.0[c] = mixed.round() as u8;
        }
    }

    fn line(img: &mut RgbaImage, from: (i64, i64), to: (i64, i64), color: [u8; 4], alpha: f32) {
        let (mut x0, mut y0) = from;
        let (dx, dy) = ((to.0 - x0).abs(), -(to.1 - y0).abs());
        let (sx, sy) = (if x0 < to.0 { 1 } else { -1 }, if y0 < to.1 { 1 } else { -1 });
        let mut err = dx + dy;
        loop {
            blend(img, x0, y0, color, alpha);
            if (x0, y0) == to {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Rasterizes a vertex buffer. Every `dimensionality` consecutive vertices are one
    /// polyline. Opacity is boosted by `gain` so that light bins stay visible.
    pub fn render_plot(vertices: &[Vertex], dimensionality: usize, frame: PlotFrame, gain: f32) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(frame.width, frame.height, Rgba([16, 16, 16, 255]));
        if dimensionality == 0 {
            return img;
        }
        let axis_color = [90, 90, 90, 255];
        for d in 0..dimensionality {
            let top = Vertex { x: d as f32, y: frame.maxval, ..Vertex::default() };
            let bottom = Vertex { x: d as f32, y: frame.minval, ..Vertex::default() };
            line(
                &mut img,
                frame.project(dimensionality, &top),
                frame.project(dimensionality, &bottom),
                axis_color,
                1.0,
            );
        }
        for polyline in vertices.chunks_exact(dimensionality) {
            for pair in polyline.windows(2) {
                let alpha = (pair[0].opacity * gain).clamp(0.02, 1.0);
                line(
                    &mut img,
                    frame.project(dimensionality, &pair[0]),
                    frame.project(dimensionality, &pair[1]),
                    pair[0].color,
                    alpha,
                );
            }
        }
        img
    }

    pub fn save(name: &str, img: &RgbaImage) -> Result<(), image::error::ImageError> {
        let output = std::fs::File::create(name)?;
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(img.as_raw(), img.width(), img.height(), image::ExtendedColorType::Rgba8)?;

        Ok(())
    }
}
