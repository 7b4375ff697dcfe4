use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use log::debug;

use super::error::ClassifierError;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// A decoded RGB image ready for embedding: a captured video frame or a
/// decoded upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Wraps packed RGB8 pixels (`width * height * 3` bytes, row-major).
    ///
    /// # Errors
    /// - `ValidationError` if either side is zero
    /// - `ValidationError` if the buffer length does not match the dimensions
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, ClassifierError> {
        if width == 0 || height == 0 {
            return Err(ClassifierError::ValidationError(
                format!("Frame dimensions must be non-zero, got {}x{}", width, height)
            ));
        }
        let expected = width as usize * height as usize * 3;
        let actual = pixels.len();
        RgbImage::from_raw(width, height, pixels)
            .map(|image| Self { image })
            .ok_or_else(|| ClassifierError::ValidationError(
                format!("Frame buffer holds {} bytes, {}x{} RGB needs {}", actual, width, height, expected)
            ))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }
}

impl From<RgbImage> for Frame {
    fn from(image: RgbImage) -> Self {
        Self { image }
    }
}

/// An encoded image (PNG, JPEG or BMP) as supplied by an upload, not yet
/// decoded.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

impl RawImage {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { name: None, bytes }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Ok(Self {
            name: Some(path.display().to_string()),
            bytes,
        })
    }

    /// Reads every image file directly inside `dir`, sorted by file name.
    /// Files without an image extension are skipped.
    pub fn collect_dir(dir: impl AsRef<Path>) -> Result<Vec<Self>, ClassifierError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();
        debug!("Found {} images in {:?}", paths.len(), dir.as_ref());
        paths.iter().map(Self::from_path).collect()
    }

    /// Decodes the bytes into an RGB frame.
    pub fn decode(&self) -> Result<Frame, ClassifierError> {
        let decoded = image::load_from_memory(&self.bytes).map_err(|e| {
            ClassifierError::ImageError(match &self.name {
                Some(name) => format!("{}: {}", name, e),
                None => e.to_string(),
            })
        })?;
        Ok(Frame::from(decoded.to_rgb8()))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
