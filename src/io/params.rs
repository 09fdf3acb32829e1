//! Read/write fitted parameter JSON files.
//!
//! A params file records the per-channel adjustments of one match so they can
//! be re-applied to other images later (`levels apply`):
//! - working mode and strategy
//! - one entry per channel, in channel order
//! - generation metadata

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelFit, ColorMode, FitStrategy, LevelsAdjustment};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsChannel {
    pub label: String,
    pub adjustment: LevelsAdjustment,
    #[serde(default)]
    pub degenerate: bool,
    #[serde(default)]
    pub rmse: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsFile {
    pub tool: String,
    pub generated: DateTime<FixedOffset>,
    pub mode: ColorMode,
    pub strategy: FitStrategy,
    pub channels: Vec<ParamsChannel>,
}

impl ParamsFile {
    pub fn from_fits(mode: ColorMode, strategy: FitStrategy, fits: &[ChannelFit]) -> Self {
        Self {
            tool: "levels".to_string(),
            generated: Local::now().fixed_offset(),
            mode,
            strategy,
            channels: fits
                .iter()
                .map(|c| ParamsChannel {
                    label: c.label.clone(),
                    adjustment: c.fit.adjustment,
                    degenerate: c.fit.degenerate,
                    rmse: c.fit.rmse,
                })
                .collect(),
        }
    }

    pub fn adjustments(&self) -> Vec<LevelsAdjustment> {
        self.channels.iter().map(|c| c.adjustment).collect()
    }

    /// Channel labels must follow the mode and every adjustment must lie
    /// within the fit bounds.
    pub fn validate(&self) -> Result<(), AppError> {
        let expected = self.mode.channel_labels();
        let labels: Vec<&str> = self.channels.iter().map(|c| c.label.as_str()).collect();
        if labels != expected {
            return Err(AppError::invalid_input(format!(
                "Params for mode {} must list channels {}, found {}.",
                self.mode.display_name(),
                expected.join(","),
                labels.join(",")
            )));
        }
        if let Some(c) = self.channels.iter().find(|c| !c.adjustment.within_bounds()) {
            return Err(AppError::invalid_input(format!(
                "Channel {} adjustment {:?} is out of bounds.",
                c.label, c.adjustment
            )));
        }
        Ok(())
    }
}

/// Write a params JSON file.
pub fn write_params_json(path: &Path, params: &ParamsFile) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::io(format!("Failed to create params JSON '{}': {e}", path.display()))
    })?;
    serde_json::to_writer_pretty(file, params)
        .map_err(|e| AppError::io(format!("Failed to write params JSON: {e}")))?;
    Ok(())
}

/// Read and validate a params JSON file.
pub fn read_params_json(path: &Path) -> Result<ParamsFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open params JSON '{}': {e}", path.display())))?;
    let params: ParamsFile = serde_json::from_reader(file)
        .map_err(|e| AppError::config(format!("Invalid params JSON: {e}")))?;
    params.validate()?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BandFit;
    use crate::error::ErrorKind;

    fn fits() -> Vec<ChannelFit> {
        ["R", "G", "B"]
            .iter()
            .enumerate()
            .map(|(index, label)| ChannelFit {
                index,
                label: label.to_string(),
                fit: BandFit {
                    adjustment: LevelsAdjustment {
                        gamma: 1.0 + index as f64 * 0.25,
                        ..LevelsAdjustment::IDENTITY
                    },
                    degenerate: false,
                    cost: 0.0,
                    rmse: 0.001,
                    evaluations: 7,
                },
            })
            .collect()
    }

    #[test]
    fn written_params_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let params = ParamsFile::from_fits(ColorMode::Rgb, FitStrategy::Pixels, &fits());
        write_params_json(&path, &params).unwrap();
        let back = read_params_json(&path).unwrap();

        assert_eq!(back.mode, ColorMode::Rgb);
        assert_eq!(back.strategy, FitStrategy::Pixels);
        assert_eq!(back.adjustments(), params.adjustments());
        assert!((back.adjustments()[2].gamma - 1.5).abs() < 1e-12);
    }

    #[test]
    fn channels_must_follow_the_mode() {
        let mut params = ParamsFile::from_fits(ColorMode::Rgb, FitStrategy::Histogram, &fits());
        params.mode = ColorMode::Rgba;
        assert_eq!(params.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn out_of_bounds_adjustment_is_rejected() {
        let mut params = ParamsFile::from_fits(ColorMode::Rgb, FitStrategy::Pixels, &fits());
        params.channels[0].adjustment.input_white = 1.5;
        assert!(params.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken-params.json");
        std::fs::write(&path, "{\"tool\": \"levels\"").unwrap();
        let err = read_params_json(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
