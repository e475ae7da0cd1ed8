use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use itertools::iproduct;
use std::path::Path;

/// Colour bands are the only channels a decoded image provides
pub const MAX_CHANNELS: usize = 3;

/// A single 16-bit channel plane
pub type Plane = ImageBuffer<Luma<u16>, Vec<u16>>;

/// A multi-channel micrograph held as one 16-bit plane per channel. Channel
/// numbering is 1-based to match the configured channel indices.
pub struct Micrograph {
    planes: Vec<Plane>,
}

impl Micrograph {
    /// Opens any format `image` can decode. Colour bands (minus alpha) become
    /// channels 1..=3; a grayscale image has a single channel.
    pub fn open(path: &Path) -> Result<Self> {
        let img = image::open(path).with_context(|| format!("Failed to open image {:?}", path))?;
        Ok(Micrograph::from_dynamic(&img))
    }

    pub fn from_dynamic(img: &DynamicImage) -> Self {
        if img.color().has_color() {
            let rgb = img.to_rgb16();
            let planes = (0..MAX_CHANNELS)
                .map(|band| {
                    Plane::from_fn(rgb.width(), rgb.height(), |x, y| {
                        Luma([rgb.get_pixel(x, y)[band]])
                    })
                })
                .collect();
            Micrograph { planes }
        } else {
            Micrograph {
                planes: vec![img.to_luma16()],
            }
        }
    }

    pub fn num_channels(&self) -> usize {
        self.planes.len()
    }

    /// Plane for a 1-based channel number
    pub fn plane(&self, channel: usize) -> Result<&Plane> {
        if channel == 0 {
            return Err(anyhow!("Channel numbers start at 1"));
        }
        self.planes.get(channel - 1).ok_or_else(|| {
            anyhow!(
                "Image has {} channel(s), channel {} requested",
                self.planes.len(),
                channel
            )
        })
    }
}

/// Linearly stretches a plane's min..max onto 0..255. A uniform plane keeps
/// its own level, scaled down to 8 bits.
pub fn plane_to_gray8(plane: &Plane) -> GrayImage {
    let (mn, mx) = plane
        .pixels()
        .fold((u16::MAX, u16::MIN), |(mn, mx), p| (mn.min(p[0]), mx.max(p[0])));

    if mx <= mn {
        return GrayImage::from_pixel(plane.width(), plane.height(), Luma([(mn >> 8) as u8]));
    }

    let mut out = GrayImage::new(plane.width(), plane.height());
    let range = (mx - mn) as f32;

    iproduct!(0..plane.height(), 0..plane.width()).for_each(|(y, x)| {
        let v = plane.get_pixel(x, y)[0].saturating_sub(mn) as f32 / range * 255.0;
        out.put_pixel(x, y, Luma([v.round() as u8]));
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_rgb_bands_become_channels() {
        let mut rgb = RgbImage::new(4, 3);
        rgb.put_pixel(1, 2, Rgb([10, 20, 255]));
        let micrograph = Micrograph::from_dynamic(&DynamicImage::ImageRgb8(rgb));

        assert_eq!(micrograph.num_channels(), 3);
        // 8-bit samples are widened to the full 16-bit range
        assert_eq!(micrograph.plane(1).unwrap().get_pixel(1, 2)[0], 10 * 257);
        assert_eq!(micrograph.plane(3).unwrap().get_pixel(1, 2)[0], 65535);
        assert!(micrograph.plane(4).is_err());
        assert!(micrograph.plane(0).is_err());
    }

    #[test]
    fn test_grayscale_has_one_channel() {
        let gray = DynamicImage::ImageLuma16(Plane::from_pixel(2, 2, Luma([7])));
        let micrograph = Micrograph::from_dynamic(&gray);
        assert_eq!(micrograph.num_channels(), 1);
        assert_eq!(micrograph.plane(1).unwrap().get_pixel(0, 0)[0], 7);
    }

    #[test]
    fn test_plane_to_gray8_stretches() {
        let mut plane = Plane::from_pixel(2, 1, Luma([100]));
        plane.put_pixel(1, 0, Luma([300]));
        let gray = plane_to_gray8(&plane);
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_plane_to_gray8_keeps_uniform_level() {
        let white = plane_to_gray8(&Plane::from_pixel(3, 2, Luma([u16::MAX])));
        assert!(white.pixels().all(|p| p[0] == 255));
        let black = plane_to_gray8(&Plane::from_pixel(3, 2, Luma([0])));
        assert!(black.pixels().all(|p| p[0] == 0));
    }
}
