//! Texture decoding

use crate::backend::types::ImageFormat;
use crate::resources::error::{LoadError, LoadResult};
use image::{DynamicImage, GenericImageView};
use std::path::Path;

/// Decoded RGBA8 pixels waiting to be uploaded
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl RawImage {
    /// Load and decode an image file
    pub fn from_file<P: AsRef<Path>>(path: P) -> LoadResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|source| LoadError::Texture {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_image(img, &name))
    }

    /// Decode an image held in memory
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        let data = img.to_rgba8().into_raw();

        Self {
            width,
            height,
            format: ImageFormat::Rgba8UnormSrgb,
            data,
            name: name.to_string(),
        }
    }

    /// Reinterpret the pixels as linear data (normal and metallic-roughness maps)
    pub fn into_linear(mut self) -> Self {
        self.format = ImageFormat::Rgba8Unorm;
        self
    }
}
