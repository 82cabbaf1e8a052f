//! Content-addressed image references

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::TriageError;

/// A source photograph identified by the SHA-256 of its bytes
///
/// The id is computed once at ingest and is the key for de-duplication and
/// for the inference cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Lowercase hex SHA-256 of the file contents
    pub id: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl ImageReference {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            width,
            height,
        }
    }

    /// Hash a file and read its pixel dimensions
    ///
    /// Blocking; call from `spawn_blocking` inside async code. Dimensions are
    /// 0x0 when the header cannot be read, decode failures surface later when
    /// the image is placed in a grid.
    pub fn from_file(path: &Path) -> Result<Self, TriageError> {
        let bytes = std::fs::read(path)?;
        let id = content_hash(&bytes);
        let (width, height) = image::image_dimensions(path).unwrap_or((0, 0));

        Ok(Self::new(id, path, width, height))
    }

    /// File name for display
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lowercase hex SHA-256 of a byte slice
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_hex() {
        let hash = content_hash(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_from_file_reads_dimensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        image::RgbImage::from_pixel(12, 8, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let image_ref = ImageReference::from_file(&path).unwrap();
        assert_eq!((image_ref.width, image_ref.height), (12, 8));
        assert_eq!(image_ref.id.len(), 64);
        assert_eq!(image_ref.file_name(), "photo.png");
    }

    #[test]
    fn test_from_file_undecodable_has_zero_dimensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        let image_ref = ImageReference::from_file(&path).unwrap();
        assert_eq!((image_ref.width, image_ref.height), (0, 0));
    }
}
