//! In-process image resizing.

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::Path;

use super::ToolError;

/// Decode `src`, apply its EXIF orientation, scale to `height` keeping the
/// aspect ratio, and write `dest` in the format of its extension.
pub fn resize_to_height(src: &Path, dest: &Path, height: u32) -> Result<(), ToolError> {
    let mut decoder = ImageReader::open(src)?.with_guessed_format()?.into_decoder()?;
    let orientation = decoder.orientation()?;

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    let resized = img.resize(u32::MAX, height, FilterType::Lanczos3);
    resized.save(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.png");
        let dest = temp.path().join("dest.png");
        RgbImage::from_pixel(40, 20, Rgb([10, 20, 30])).save(&src).unwrap();

        resize_to_height(&src, &dest, 10).unwrap();

        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (20, 10));
    }

    #[test]
    fn test_unreadable_source() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("broken.jpg");
        std::fs::write(&src, b"not an image").unwrap();
        let err = resize_to_height(&src, &temp.path().join("out.jpg"), 10);
        assert!(err.is_err());
    }
}
