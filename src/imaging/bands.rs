//! Planar 8-bit channels of one image.
//!
//! The fitter works band by band, so images are split into one `GrayImage` per
//! channel up front. Resampling also happens per plane, which is equivalent to
//! resampling the interleaved image since the filter is separable per channel.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

use crate::domain::ColorMode;
use crate::error::AppError;

/// Labelled, equally sized single-channel planes.
#[derive(Debug, Clone)]
pub struct Bands {
    labels: Vec<String>,
    planes: Vec<GrayImage>,
}

impl Bands {
    pub fn new(labels: Vec<String>, planes: Vec<GrayImage>) -> Result<Self, AppError> {
        if planes.is_empty() {
            return Err(AppError::invalid_input("An image needs at least one channel."));
        }
        if labels.len() != planes.len() {
            return Err(AppError::invalid_input(format!(
                "{} labels for {} channels.",
                labels.len(),
                planes.len()
            )));
        }
        let dims = planes[0].dimensions();
        if planes.iter().any(|p| p.dimensions() != dims) {
            return Err(AppError::invalid_input("Channels differ in size."));
        }
        Ok(Self { labels, planes })
    }

    /// Build from raw row-major planes.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: Vec<(String, Vec<u8>)>,
    ) -> Result<Self, AppError> {
        let mut labels = Vec::with_capacity(channels.len());
        let mut planes = Vec::with_capacity(channels.len());
        for (label, data) in channels {
            let plane = GrayImage::from_raw(width, height, data).ok_or_else(|| {
                AppError::invalid_input(format!(
                    "Channel {label} does not hold {width}x{height} samples."
                ))
            })?;
            labels.push(label);
            planes.push(plane);
        }
        Self::new(labels, planes)
    }

    /// Split `image` into the channels of `mode`, converting pixel formats as
    /// needed.
    pub fn from_image(image: &DynamicImage, mode: ColorMode) -> Self {
        let (width, height) = (image.width(), image.height());
        let planes = match mode {
            ColorMode::L => vec![image.to_luma8()],
            ColorMode::La => split_interleaved(image.to_luma_alpha8().as_raw(), 2, width, height),
            ColorMode::Rgb => split_interleaved(image.to_rgb8().as_raw(), 3, width, height),
            ColorMode::Rgba => split_interleaved(image.to_rgba8().as_raw(), 4, width, height),
        };
        let labels = mode
            .channel_labels()
            .iter()
            .map(|l| l.to_string())
            .collect();
        Self { labels, planes }
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.planes[0].dimensions()
    }

    pub fn plane(&self, index: usize) -> &GrayImage {
        &self.planes[index]
    }

    /// Channel samples as `f64` in `[0, 255]`, row-major.
    pub fn channel_values(&self, index: usize) -> Vec<f64> {
        self.planes[index]
            .as_raw()
            .iter()
            .map(|&v| f64::from(v))
            .collect()
    }

    /// Bicubic (Catmull-Rom) resample of every plane.
    pub fn resize(&self, width: u32, height: u32) -> Bands {
        let planes = self
            .planes
            .iter()
            .map(|p| imageops::resize(p, width, height, FilterType::CatmullRom))
            .collect();
        Bands {
            labels: self.labels.clone(),
            planes,
        }
    }
}

fn split_interleaved(raw: &[u8], channels: usize, width: u32, height: u32) -> Vec<GrayImage> {
    (0..channels)
        .map(|c| {
            GrayImage::from_fn(width, height, |x, y| {
                let idx = (y as usize * width as usize + x as usize) * channels + c;
                Luma([raw[idx]])
            })
        })
        .collect()
}
