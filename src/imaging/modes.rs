//! Working mode negotiation.
//!
//! Images are matched in one common 8-bit layout. The common mode is the
//! smallest one that holds every input without loss: a colour image whose
//! pixels are all neutral counts as grayscale, and an alpha channel that is
//! fully opaque is ignored.

use image::DynamicImage;
use tracing::warn;

use crate::domain::ColorMode;

/// Nominal mode of the decoded pixel buffer.
///
/// Formats without an 8-bit counterpart in `ColorMode` fall back to the
/// closest one (16-bit and float buffers lose precision).
pub fn mode_of(image: &DynamicImage) -> ColorMode {
    let (mode, exact) = match image {
        DynamicImage::ImageLuma8(_) => (ColorMode::L, true),
        DynamicImage::ImageLumaA8(_) => (ColorMode::La, true),
        DynamicImage::ImageRgb8(_) => (ColorMode::Rgb, true),
        DynamicImage::ImageRgba8(_) => (ColorMode::Rgba, true),
        DynamicImage::ImageLuma16(_) => (ColorMode::L, false),
        DynamicImage::ImageLumaA16(_) => (ColorMode::La, false),
        DynamicImage::ImageRgba16(_) | DynamicImage::ImageRgba32F(_) => (ColorMode::Rgba, false),
        _ => (ColorMode::Rgb, false),
    };
    if !exact {
        warn!(
            from = ?image.color(),
            to = mode.display_name(),
            "unsupported pixel format, converting"
        );
    }
    mode
}

/// True when every pixel is neutral (R = G = B).
pub fn is_grayscale(image: &DynamicImage) -> bool {
    match image {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_) => true,
        DynamicImage::ImageRgb8(buf) => buf.pixels().all(|p| p[0] == p[1] && p[1] == p[2]),
        DynamicImage::ImageRgba8(buf) => buf.pixels().all(|p| p[0] == p[1] && p[1] == p[2]),
        other => other
            .to_rgb8()
            .pixels()
            .all(|p| p[0] == p[1] && p[1] == p[2]),
    }
}

/// True when the image has an alpha channel that is not fully opaque.
pub fn has_alpha(image: &DynamicImage) -> bool {
    if !image.color().has_alpha() {
        return false;
    }
    match image {
        DynamicImage::ImageLumaA8(buf) => buf.pixels().any(|p| p[1] != u8::MAX),
        DynamicImage::ImageRgba8(buf) => buf.pixels().any(|p| p[3] != u8::MAX),
        other => other.to_rgba8().pixels().any(|p| p[3] != u8::MAX),
    }
}

/// Smallest mode able to hold anything either `a` or `b` can.
pub fn superset_mode(a: ColorMode, b: ColorMode) -> ColorMode {
    if a.supports(b) {
        a
    } else if b.supports(a) {
        b
    } else {
        // Only LA + RGB are incomparable.
        ColorMode::Rgba
    }
}

/// Mode the pixel data actually needs, regardless of its stored layout.
pub fn empirical_mode(image: &DynamicImage) -> ColorMode {
    match (is_grayscale(image), has_alpha(image)) {
        (true, false) => ColorMode::L,
        (true, true) => ColorMode::La,
        (false, false) => ColorMode::Rgb,
        (false, true) => ColorMode::Rgba,
    }
}

/// Mode that can represent every image in `images` without loss.
///
/// Only images whose nominal mode does not fit the running result are
/// inspected pixel by pixel.
pub fn determine_common_mode(images: &[&DynamicImage]) -> ColorMode {
    let mut common = ColorMode::L;
    for image in images {
        let nominal = mode_of(image);
        if !common.supports(nominal) {
            common = superset_mode(common, empirical_mode(image));
        }
    }
    common
}

/// Re-encode `image` in `mode`.
pub fn convert(image: &DynamicImage, mode: ColorMode) -> DynamicImage {
    match mode {
        ColorMode::L => DynamicImage::ImageLuma8(image.to_luma8()),
        ColorMode::La => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        ColorMode::Rgb => DynamicImage::ImageRgb8(image.to_rgb8()),
        ColorMode::Rgba => DynamicImage::ImageRgba8(image.to_rgba8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, LumaA, Rgb, RgbImage, Rgba, RgbaImage};

    fn gray_rgb() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(4, 4, |x, _| {
            let v = (x * 60) as u8;
            Rgb([v, v, v])
        }))
    }

    fn colour_rgb() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(4, 4, |x, y| {
            Rgb([(x * 60) as u8, (y * 60) as u8, 7])
        }))
    }

    fn opaque_rgba() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([10, 20, 30, 255])))
    }

    fn translucent_la() -> DynamicImage {
        DynamicImage::ImageLumaA8(ImageBuffer::from_fn(3, 3, |x, _| {
            LumaA([50, if x == 0 { 128 } else { 255 }])
        }))
    }

    #[test]
    fn neutral_rgb_counts_as_grayscale() {
        assert!(is_grayscale(&gray_rgb()));
        assert!(!is_grayscale(&colour_rgb()));
        assert_eq!(empirical_mode(&gray_rgb()), ColorMode::L);
    }

    #[test]
    fn opaque_alpha_is_ignored() {
        assert!(!has_alpha(&opaque_rgba()));
        assert!(has_alpha(&translucent_la()));
        assert!(!has_alpha(&colour_rgb()));
        assert_eq!(empirical_mode(&opaque_rgba()), ColorMode::Rgb);
    }

    #[test]
    fn superset_of_la_and_rgb_is_rgba() {
        assert_eq!(superset_mode(ColorMode::La, ColorMode::Rgb), ColorMode::Rgba);
        assert_eq!(superset_mode(ColorMode::L, ColorMode::Rgb), ColorMode::Rgb);
        assert_eq!(superset_mode(ColorMode::Rgba, ColorMode::L), ColorMode::Rgba);
        assert_eq!(superset_mode(ColorMode::La, ColorMode::La), ColorMode::La);
    }

    #[test]
    fn common_mode_uses_pixel_content() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([9])));
        assert_eq!(determine_common_mode(&[&gray, &gray_rgb()]), ColorMode::L);
        assert_eq!(determine_common_mode(&[&gray, &colour_rgb()]), ColorMode::Rgb);
        assert_eq!(determine_common_mode(&[&opaque_rgba()]), ColorMode::Rgb);
        assert_eq!(
            determine_common_mode(&[&translucent_la(), &colour_rgb()]),
            ColorMode::Rgba
        );
    }

    #[test]
    fn wide_formats_fall_back_to_8bit_modes() {
        let wide = DynamicImage::ImageLuma16(ImageBuffer::from_pixel(2, 2, Luma([1000u16])));
        assert_eq!(mode_of(&wide), ColorMode::L);
        assert_eq!(determine_common_mode(&[&wide]), ColorMode::L);
    }

    #[test]
    fn convert_changes_layout() {
        let out = convert(&colour_rgb(), ColorMode::Rgba);
        assert_eq!(mode_of(&out), ColorMode::Rgba);
        assert_eq!(out.to_rgba8().get_pixel(1, 2).0, [60, 120, 7, 255]);
    }
}
