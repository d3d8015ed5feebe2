//! Synthetic fundus-like images for the simulated scope.
//!
//! A warm radial gradient with sparse speckle noise, encoded as JPEG. Brightness
//! scales the whole image; focus away from the midpoint washes the speckle out,
//! which is enough for a UI to show that the controls reach the device.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, Rgb, RgbImage};

/// Simple pseudo-random number generator (LCG) for reproducible noise.
/// Uses the same algorithm as glibc for predictable cross-platform behavior.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Three-stop radial colour ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    /// Colour at and inside the inner radius.
    pub center: [u8; 3],
    /// Colour halfway between the radii.
    pub mid: [u8; 3],
    /// Colour at and beyond the outer radius.
    pub edge: [u8; 3],
    /// Inner radius as a fraction of image width.
    pub inner: f32,
    /// Outer radius as a fraction of image width.
    pub outer: f32,
}

/// Live-feed look.
pub const FRAME_PALETTE: Palette = Palette {
    center: [0xff, 0xcc, 0xcc],
    mid: [0xff, 0x99, 0x99],
    edge: [0xcc, 0x66, 0x66],
    inner: 50.0 / 640.0,
    outer: 300.0 / 640.0,
};

/// Still-photo look: lighter, wider falloff.
pub const PHOTO_PALETTE: Palette = Palette {
    center: [0xff, 0xdd, 0xdd],
    mid: [0xff, 0xaa, 0xaa],
    edge: [0xdd, 0x77, 0x77],
    inner: 100.0 / 1280.0,
    outer: 500.0 / 1280.0,
};

/// Optical settings applied on top of the palette.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optics {
    /// Illumination, 0–100; 50 leaves the palette unchanged.
    pub brightness: f64,
    /// Focus position, 0–100; 50 is sharp.
    pub focus: f64,
}

impl Default for Optics {
    fn default() -> Self {
        Self {
            brightness: 50.0,
            focus: 50.0,
        }
    }
}

impl Optics {
    fn gain(&self) -> f32 {
        (0.5 + self.brightness.clamp(0.0, 100.0) / 100.0) as f32
    }

    /// 1.0 when in focus, 0.0 at either end of travel.
    fn sharpness(&self) -> f32 {
        (1.0 - (self.focus.clamp(0.0, 100.0) - 50.0).abs() / 50.0) as f32
    }
}

fn lerp(a: [u8; 3], b: [u8; 3], t: f32) -> [f32; 3] {
    [
        f32::from(a[0]) + (f32::from(b[0]) - f32::from(a[0])) * t,
        f32::from(a[1]) + (f32::from(b[1]) - f32::from(a[1])) * t,
        f32::from(a[2]) + (f32::from(b[2]) - f32::from(a[2])) * t,
    ]
}

/// Render one image.
///
/// `seed` drives the speckle layout; the same seed, size and optics always
/// produce the same pixels.
#[must_use]
pub fn render(width: u32, height: u32, palette: &Palette, optics: Optics, seed: u64) -> RgbImage {
    let width = width.max(1);
    let height = height.max(1);
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let r0 = palette.inner * width as f32;
    let r1 = (palette.outer * width as f32).max(r0 + 1.0);
    let gain = optics.gain();

    let mut img = RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let t = ((dx.hypot(dy) - r0) / (r1 - r0)).clamp(0.0, 1.0);
        let rgb = if t < 0.5 {
            lerp(palette.center, palette.mid, t * 2.0)
        } else {
            lerp(palette.mid, palette.edge, (t - 0.5) * 2.0)
        };
        Rgb(rgb.map(|c| (c * gain).clamp(0.0, 255.0) as u8))
    });

    // Speckle: 2x2 random-colour dots blended at 10% (scaled by sharpness)
    let alpha = 0.1 * optics.sharpness();
    if alpha > 0.0 {
        let speckles = (u64::from(width) * u64::from(height) / 300).max(1);
        let mut state = seed;
        for _ in 0..speckles {
            state = prng(state);
            let x = (state % u64::from(width)) as u32;
            state = prng(state);
            let y = (state % u64::from(height)) as u32;
            state = prng(state);
            let colour = [
                (state & 0xff) as f32,
                ((state >> 8) & 0xff) as f32,
                ((state >> 16) & 0xff) as f32,
            ];
            for (px, py) in [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)] {
                if px < width && py < height {
                    let p = img.get_pixel_mut(px, py);
                    for c in 0..3 {
                        let base = f32::from(p.0[c]);
                        p.0[c] = (base + (colour[c] - base) * alpha) as u8;
                    }
                }
            }
        }
    }

    img
}

/// Encode `img` as baseline JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut out = Vec::with_capacity(img.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(img)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let a = render(64, 48, &FRAME_PALETTE, Optics::default(), 11);
        let b = render(64, 48, &FRAME_PALETTE, Optics::default(), 11);
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (64, 48));
    }

    #[test]
    fn test_brightness_scales_image() {
        let dim = render(32, 32, &FRAME_PALETTE, Optics { brightness: 0.0, focus: 0.0 }, 1);
        let lit = render(32, 32, &FRAME_PALETTE, Optics { brightness: 50.0, focus: 0.0 }, 1);
        let sum = |img: &RgbImage| img.as_raw().iter().map(|&v| u64::from(v)).sum::<u64>();
        assert!(sum(&dim) < sum(&lit));
    }

    #[test]
    fn test_centre_is_lighter_than_edge() {
        let img = render(100, 100, &PHOTO_PALETTE, Optics { brightness: 50.0, focus: 0.0 }, 0);
        let centre = img.get_pixel(50, 50).0;
        let corner = img.get_pixel(0, 0).0;
        assert!(centre[1] > corner[1]);
    }

    #[test]
    fn test_encode_jpeg_magic() {
        let img = render(16, 16, &FRAME_PALETTE, Optics::default(), 3);
        let jpeg = encode_jpeg(&img, 70).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }
}
