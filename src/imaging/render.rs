//! Applying fitted curves to an image.

use image::DynamicImage;
use rayon::prelude::*;

use crate::domain::{ColorMode, LevelsAdjustment};
use crate::error::AppError;
use crate::imaging::modes::convert;
use crate::models::lookup_table;

/// Pixels handed to one rayon task.
const ROWS_PER_TASK: usize = 64;

/// Convert `image` to `mode` and remap every channel through the lookup table
/// of its adjustment (one adjustment per channel, in channel order).
pub fn level_image(
    image: &DynamicImage,
    adjustments: &[LevelsAdjustment],
    mode: ColorMode,
) -> Result<DynamicImage, AppError> {
    if adjustments.len() != mode.channel_count() {
        return Err(AppError::invalid_input(format!(
            "{} adjustments for a {} image with {} channels.",
            adjustments.len(),
            mode.display_name(),
            mode.channel_count()
        )));
    }
    let tables: Vec<[u8; 256]> = adjustments.iter().map(lookup_table).collect();

    let mut out = convert(image, mode);
    let row_len = out.width() as usize * tables.len();
    if row_len == 0 || out.height() == 0 {
        return Ok(out);
    }
    let raw: &mut [u8] = match &mut out {
        DynamicImage::ImageLuma8(buf) => &mut **buf,
        DynamicImage::ImageLumaA8(buf) => &mut **buf,
        DynamicImage::ImageRgb8(buf) => &mut **buf,
        DynamicImage::ImageRgba8(buf) => &mut **buf,
        _ => return Err(AppError::image("Converted image is not 8-bit.")),
    };

    raw.par_chunks_mut(row_len * ROWS_PER_TASK).for_each(|block| {
        for pixel in block.chunks_exact_mut(tables.len()) {
            for (v, table) in pixel.iter_mut().zip(&tables) {
                *v = table[*v as usize];
            }
        }
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn identity_leaves_pixels_alone() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(7, 5, |x, y| {
            Rgb([(x * 30) as u8, (y * 50) as u8, 99])
        }));
        let out = level_image(&img, &[LevelsAdjustment::IDENTITY; 3], ColorMode::Rgb).unwrap();
        assert_eq!(out.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn each_channel_uses_its_own_table() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 3, Rgb([128, 128, 128])));
        let adjustments = [
            LevelsAdjustment::IDENTITY,
            LevelsAdjustment::flat(0.0),
            LevelsAdjustment {
                input_black: 0.0,
                input_white: 0.5,
                ..LevelsAdjustment::IDENTITY
            },
        ];
        let out = level_image(&img, &adjustments, ColorMode::Rgb).unwrap().to_rgb8();
        assert!(out.pixels().all(|p| p.0 == [128, 0, 255]));
    }

    #[test]
    fn output_follows_the_requested_mode() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 200, Luma([51])));
        let inverted = LevelsAdjustment {
            output_black: 1.0,
            output_white: 0.0,
            ..LevelsAdjustment::IDENTITY
        };
        let out = level_image(&img, &[inverted; 3], ColorMode::Rgb).unwrap();
        assert_eq!(out.color(), image::ColorType::Rgb8);
        assert!(out.to_rgb8().pixels().all(|p| p.0 == [204, 204, 204]));
    }

    #[test]
    fn adjustment_count_must_match_mode() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(2, 2));
        assert!(level_image(&img, &[LevelsAdjustment::IDENTITY; 2], ColorMode::L).is_err());
    }
}
