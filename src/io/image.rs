//! Image file load/save.
//!
//! The format is picked from the file contents on load and from the extension
//! on save, as `image` does by default.

use std::path::Path;

use image::{DynamicImage, ImageError, ImageReader};

use crate::error::AppError;

/// Decode an image file.
pub fn load_image(path: &Path) -> Result<DynamicImage, AppError> {
    let reader = ImageReader::open(path)
        .map_err(|e| AppError::io(format!("Failed to open image '{}': {e}", path.display())))?
        .with_guessed_format()
        .map_err(|e| AppError::io(format!("Failed to read image '{}': {e}", path.display())))?;
    reader
        .decode()
        .map_err(|e| image_error("decode", path, e))
}

/// Encode `image` to `path`, format chosen by extension.
pub fn save_image(path: &Path, image: &DynamicImage) -> Result<(), AppError> {
    image.save(path).map_err(|e| image_error("save", path, e))
}

fn image_error(action: &str, path: &Path, e: ImageError) -> AppError {
    match e {
        ImageError::IoError(io) => {
            AppError::io(format!("Failed to {action} image '{}': {io}", path.display()))
        }
        other => AppError::image(format!("Failed to {action} image '{}': {other}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{Rgb, RgbImage};

    #[test]
    fn png_round_trips_losslessly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.png");
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(5, 4, |x, y| {
            Rgb([x as u8 * 40, y as u8 * 60, 17])
        }));
        save_image(&path, &img).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_image(&dir.path().join("does-not-exist.png")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn garbage_is_an_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = load_image(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Image);
    }
}
