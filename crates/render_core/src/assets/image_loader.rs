//! Image loading utilities for texture data

use std::path::Path;

use crate::assets::AssetError;

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Load an image from a file path, converting to RGBA8
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path_ref = path.as_ref();
        log::debug!("Loading image from: {:?}", path_ref);

        let rgba = image::open(path_ref)?.to_rgba8();
        let (width, height) = rgba.dimensions();

        log::info!("Loaded image {}x{} from {:?}", width, height, path_ref);
        Ok(Self { data: rgba.into_raw(), width, height })
    }

    /// Decode an image held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self { data: rgba.into_raw(), width, height })
    }

    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = (width * height) as usize;
        Self {
            data: color.repeat(pixel_count),
            width,
            height,
        }
    }

    /// Size of the pixel data in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color() {
        let image = ImageData::solid_color(2, 3, [10, 20, 30, 40]);
        assert_eq!(image.byte_len(), 2 * 3 * 4);
        assert_eq!(&image.data[4..8], &[10, 20, 30, 40]);
    }

    #[test]
    fn test_png_round_trip_through_decoder() {
        let mut encoded = Vec::new();
        let source = image::RgbaImage::from_pixel(4, 2, image::Rgba([255, 0, 0, 255]));
        source
            .write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)
            .unwrap();

        let decoded = ImageData::from_bytes(&encoded).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 2));
        assert_eq!(&decoded.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(matches!(ImageData::from_bytes(b"not an image"), Err(AssetError::Image(_))));
    }
}
