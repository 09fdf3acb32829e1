//! Shared match/apply workflow, free of any printing.
//!
//! load -> negotiate mode -> split bands -> fit channels -> render
//!
//! The binary front-end can then focus on presentation and file output.

use image::DynamicImage;

use crate::domain::{ChannelFit, ColorMode, MatchConfig};
use crate::error::AppError;
use crate::fit::Matcher;
use crate::imaging::{Bands, determine_common_mode, level_image};
use crate::io::image::load_image;
use crate::io::params::ParamsFile;

/// All computed outputs of a single `levels match` run.
#[derive(Debug, Clone)]
pub struct MatchOutput {
    pub mode: ColorMode,
    pub fits: Vec<ChannelFit>,
    /// Bands of the image to be leveled, in `mode`.
    pub to_level: Bands,
    /// Bands of the image to match, in `mode`.
    pub to_match: Bands,
    pub leveled: DynamicImage,
}

/// Load the images named in `config`, fit them and render the result.
pub fn run_match(config: &MatchConfig) -> Result<MatchOutput, AppError> {
    let to_level = load_image(&config.to_level)?;
    let to_match = load_image(&config.to_match)?;
    let input = config.input.as_deref().map(load_image).transpose()?;
    run_match_images(config, &to_level, &to_match, input.as_ref())
}

/// Same as [`run_match`] with already decoded images.
pub fn run_match_images(
    config: &MatchConfig,
    to_level: &DynamicImage,
    to_match: &DynamicImage,
    input: Option<&DynamicImage>,
) -> Result<MatchOutput, AppError> {
    let input = input.unwrap_or(to_level);

    let mode = match config.mode {
        Some(mode) => mode,
        None => determine_common_mode(&[to_level, to_match, input]),
    };

    let x = Bands::from_image(to_level, mode);
    let y = Bands::from_image(to_match, mode);

    let matcher = Matcher::with_threads(config.options, config.threads)?;
    let fits = matcher.match_bands(&x, &y, config.strategy)?;

    let adjustments: Vec<_> = fits.iter().map(|c| c.fit.adjustment).collect();
    let leveled = level_image(input, &adjustments, mode)?;

    Ok(MatchOutput {
        mode,
        fits,
        to_level: x,
        to_match: y,
        leveled,
    })
}

/// Re-apply saved parameters to `input`.
pub fn run_apply(params: &ParamsFile, input: &DynamicImage) -> Result<DynamicImage, AppError> {
    params.validate()?;
    level_image(input, &params.adjustments(), params.mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitOptions, FitStrategy, LevelsAdjustment};
    use crate::models::lookup_table;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use std::path::PathBuf;

    fn config(mode: Option<ColorMode>) -> MatchConfig {
        MatchConfig {
            to_level: PathBuf::from("tolevel.png"),
            to_match: PathBuf::from("tomatch.png"),
            input: None,
            output: PathBuf::from("output.png"),
            mode,
            strategy: FitStrategy::Pixels,
            options: FitOptions::default(),
            threads: 2,
            export_params: None,
            plot: false,
            plot_width: 64,
            plot_height: 20,
        }
    }

    fn noise_rgb(seed: u64, w: u32, h: u32) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(seed);
        RgbImage::from_fn(w, h, |_, _| Rgb([rng.r#gen(), rng.r#gen(), rng.r#gen()]))
    }

    #[test]
    fn matched_output_reproduces_the_target() {
        let truth = LevelsAdjustment {
            input_black: 0.1,
            input_white: 0.85,
            output_black: 0.05,
            output_white: 0.95,
            gamma: 1.3,
        };
        let table = lookup_table(&truth);
        let src = noise_rgb(21, 48, 48);
        let mut dst = src.clone();
        for p in dst.pixels_mut() {
            for v in p.0.iter_mut() {
                *v = table[*v as usize];
            }
        }
        let src = DynamicImage::ImageRgb8(src);
        let dst = DynamicImage::ImageRgb8(dst);

        let out = run_match_images(&config(None), &src, &dst, None).unwrap();
        assert_eq!(out.mode, ColorMode::Rgb);
        assert_eq!(out.fits.len(), 3);

        let got = out.leveled.to_rgb8();
        let want = dst.to_rgb8();
        let max_diff = got
            .as_raw()
            .iter()
            .zip(want.as_raw())
            .map(|(&a, &b)| (i16::from(a) - i16::from(b)).abs())
            .max()
            .unwrap();
        assert!(max_diff <= 3, "max_diff={max_diff}");
    }

    #[test]
    fn grayscale_pair_negotiates_l() {
        let gray = GrayImage::from_fn(16, 16, |x, y| Luma([(x * 16 + y) as u8]));
        let a = DynamicImage::ImageLuma8(gray.clone());
        let b = DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(gray).to_rgb8());
        let out = run_match_images(&config(None), &a, &b, None).unwrap();
        assert_eq!(out.mode, ColorMode::L);
        assert_eq!(out.fits[0].fit.adjustment, LevelsAdjustment::IDENTITY);
    }

    #[test]
    fn forced_mode_wins_over_negotiation() {
        let a = DynamicImage::ImageRgb8(noise_rgb(22, 8, 8));
        let out = run_match_images(&config(Some(ColorMode::Rgba)), &a, &a, None).unwrap();
        assert_eq!(out.mode, ColorMode::Rgba);
        assert_eq!(out.fits.len(), 4);
        assert!(out.fits[3].fit.degenerate);
    }

    #[test]
    fn apply_reuses_fitted_params() {
        let src = DynamicImage::ImageRgb8(noise_rgb(23, 16, 16));
        let out = run_match_images(&config(None), &src, &src, None).unwrap();
        let params = ParamsFile::from_fits(out.mode, FitStrategy::Pixels, &out.fits);
        let again = run_apply(&params, &src).unwrap();
        assert_eq!(again.to_rgb8(), out.leveled.to_rgb8());
    }
}
