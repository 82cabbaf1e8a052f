//! Photo file scanner
//!
//! Recursive discovery of image files under a source folder. Symlinks are
//! not followed, so link loops cannot recur and a photo is found only at its
//! real location. Each candidate is confirmed by its magic bytes so a `.jpg`
//! that is really a text file never reaches grid generation.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Photo scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("File access error {0}: {1}")]
    FileAccessError(PathBuf, String),
}

impl From<ScanError> for sift_common::Error {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::PathNotFound(_) | ScanError::NotADirectory(_) => {
                sift_common::Error::InvalidInput(err.to_string())
            }
            ScanError::FileAccessError(..) => sift_common::Error::Internal(err.to_string()),
        }
    }
}

/// Photo scanner
pub struct PhotoScanner {
    ignore_patterns: Vec<String>,
    max_depth: Option<usize>,
}

impl Default for PhotoScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotoScanner {
    /// Scanner with default ignore patterns (.DS_Store, Thumbs.db, .git, ...)
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
                "@eaDir".to_string(),
                "node_modules".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Image files under `root_path`, sorted by path
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }
        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut candidate_files = Vec::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .sort_by_file_name()
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() {
                        candidate_files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        let photos: Vec<PathBuf> = candidate_files
            .into_iter()
            .filter(|path| match is_image_file(path) {
                Ok(is_image) => is_image,
                Err(e) => {
                    tracing::warn!("Error verifying {}: {}", path.display(), e);
                    false
                }
            })
            .collect();

        tracing::debug!(root = %root_path.display(), count = photos.len(), "Photo scan complete");

        Ok(photos)
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        let file_name = entry.file_name().to_string_lossy();
        self.ignore_patterns
            .iter()
            .any(|pattern| file_name.contains(pattern.as_str()))
    }
}

fn is_image_extension(ext: &str) -> bool {
    matches!(
        ext,
        "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tif" | "tiff"
    )
}

/// Extension check, then magic bytes
pub fn is_image_file(path: &Path) -> Result<bool, ScanError> {
    let Some(ext) = path.extension() else {
        return Ok(false);
    };
    if !is_image_extension(&ext.to_string_lossy().to_lowercase()) {
        return Ok(false);
    }

    let mut file =
        File::open(path).map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;
    let mut buffer = [0u8; 32];
    let bytes_read = file
        .read(&mut buffer)
        .map_err(|e| ScanError::FileAccessError(path.to_path_buf(), e.to_string()))?;

    Ok(infer::is_image(&buffer[..bytes_read]))
}
