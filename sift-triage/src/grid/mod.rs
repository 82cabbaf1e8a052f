//! Grid generator
//!
//! Packs up to `dimension²` photos into one labeled composite JPEG. Cells are
//! filled row-major in input order, each thumbnail resized with Lanczos3 to
//! fit its cell (aspect preserved, centred) and tagged with its coordinate in
//! the top-left corner. Trailing cells of a partial grid stay blank and have
//! no coordinate.
//!
//! Generation is pure CPU work with no side effects; the orchestrator runs it
//! on `spawn_blocking` and persists the result.

pub mod coordinate;
pub mod label;

pub use coordinate::Coordinate;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageReader, Rgb, RgbImage};
use std::collections::BTreeMap;

use crate::error::TriageError;
use crate::models::ImageReference;

/// JPEG quality used when no setting overrides it
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Largest composite edge; JPEG tops out at 65535 and models downscale anyway
pub const MAX_GRID_SIDE_PX: u32 = 16_384;

const BACKGROUND: Rgb<u8> = Rgb([40, 40, 40]);

/// A generated composite grid
#[derive(Debug, Clone)]
pub struct Grid {
    pub grid_index: usize,
    pub dimension: u32,
    pub cell_size_px: u32,
    /// Populated cells only
    pub coordinate_map: BTreeMap<Coordinate, ImageReference>,
    /// Encoded JPEG bytes
    pub composite: Vec<u8>,
}

impl Grid {
    /// Number of cells (`dimension²`)
    pub fn capacity(&self) -> usize {
        capacity(self.dimension)
    }

    /// Image at `coordinate`, `None` for blank or out-of-range cells
    pub fn image_at(&self, coordinate: &Coordinate) -> Option<&ImageReference> {
        self.coordinate_map.get(coordinate)
    }
}

/// Cells in a `dimension`×`dimension` grid
pub fn capacity(dimension: u32) -> usize {
    (dimension as usize) * (dimension as usize)
}

/// Composite edge in pixels, `None` past [`MAX_GRID_SIDE_PX`]
pub fn grid_side(dimension: u32, cell_size_px: u32) -> Option<u32> {
    dimension
        .checked_mul(cell_size_px)
        .filter(|side| *side <= MAX_GRID_SIDE_PX)
}

/// Split an ordered list into grid-sized chunks
pub fn partition<T>(images: &[T], dimension: u32) -> Vec<&[T]> {
    let cap = capacity(dimension);
    if cap == 0 {
        return Vec::new();
    }
    images.chunks(cap).collect()
}

/// Generate a grid with the default JPEG quality
pub fn generate_grid(
    images: &[ImageReference],
    dimension: u32,
    cell_size_px: u32,
    grid_index: usize,
) -> Result<Grid, TriageError> {
    generate_grid_with_quality(images, dimension, cell_size_px, grid_index, DEFAULT_JPEG_QUALITY)
}

/// Generate a grid
///
/// # Errors
/// - `ImageDecode` naming the first image that cannot be decoded
/// - `InvalidInput` when `images` is empty or exceeds `dimension²`, or the
///   composite would be larger than [`MAX_GRID_SIDE_PX`]
pub fn generate_grid_with_quality(
    images: &[ImageReference],
    dimension: u32,
    cell_size_px: u32,
    grid_index: usize,
    jpeg_quality: u8,
) -> Result<Grid, TriageError> {
    if dimension == 0 || cell_size_px == 0 {
        return Err(invalid_input(format!(
            "Grid dimension and cell size must be positive (got {} and {})",
            dimension, cell_size_px
        )));
    }
    if images.is_empty() {
        return Err(invalid_input("Cannot generate a grid without images".to_string()));
    }
    if images.len() > capacity(dimension) {
        return Err(invalid_input(format!(
            "{} images do not fit a {}x{} grid",
            images.len(),
            dimension,
            dimension
        )));
    }

    let side = grid_side(dimension, cell_size_px).ok_or_else(|| {
        invalid_input(format!(
            "A {}x{} grid of {} px cells exceeds {} px",
            dimension, dimension, cell_size_px, MAX_GRID_SIDE_PX
        ))
    })?;
    let mut canvas = RgbImage::from_pixel(side, side, BACKGROUND);
    let mut coordinate_map = BTreeMap::new();

    for (index, image_ref) in images.iter().enumerate() {
        let coordinate = Coordinate::from_cell_index(index, dimension);
        let thumbnail = load_thumbnail(image_ref, cell_size_px)?;

        let cell_x = (coordinate.column() - 1) * cell_size_px;
        let cell_y = coordinate.row() * cell_size_px;
        let offset_x = (cell_size_px - thumbnail.width()) / 2;
        let offset_y = (cell_size_px - thumbnail.height()) / 2;
        imageops::overlay(
            &mut canvas,
            &thumbnail,
            (cell_x + offset_x) as i64,
            (cell_y + offset_y) as i64,
        );
        label::draw_label(&mut canvas, &coordinate.to_string(), cell_x, cell_y, cell_size_px);

        coordinate_map.insert(coordinate, image_ref.clone());
    }

    let mut composite = Vec::new();
    JpegEncoder::new_with_quality(&mut composite, jpeg_quality.clamp(1, 100))
        .encode_image(&canvas)
        .map_err(|e| {
            TriageError::Common(sift_common::Error::Internal(format!(
                "Failed to encode grid {}: {}",
                grid_index, e
            )))
        })?;

    tracing::debug!(
        grid_index,
        dimension,
        populated = coordinate_map.len(),
        bytes = composite.len(),
        "Generated grid composite"
    );

    Ok(Grid {
        grid_index,
        dimension,
        cell_size_px,
        coordinate_map,
        composite,
    })
}

/// Decode and shrink one source image to fit a cell
fn load_thumbnail(image_ref: &ImageReference, cell_size_px: u32) -> Result<RgbImage, TriageError> {
    let decode_error = |reason: String| TriageError::ImageDecode {
        image_id: image_ref.id.clone(),
        path: image_ref.path.display().to_string(),
        reason,
    };

    let decoded = ImageReader::open(&image_ref.path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| decode_error(e.to_string()))?
        .decode()
        .map_err(|e| decode_error(e.to_string()))?;

    let resized = decoded.resize(cell_size_px, cell_size_px, FilterType::Lanczos3);
    Ok(resized.to_rgb8())
}

fn invalid_input(message: String) -> TriageError {
    TriageError::Common(sift_common::Error::InvalidInput(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_images(dir: &Path, count: usize) -> Vec<ImageReference> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("img_{:03}.png", i));
                RgbImage::from_pixel(40 + i as u32, 30, Rgb([i as u8, 100, 200]))
                    .save(&path)
                    .unwrap();
                ImageReference::from_file(&path).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_partial_grid_maps_only_populated_cells() {
        let dir = TempDir::new().unwrap();
        let images = write_images(dir.path(), 5);

        let grid = generate_grid(&images, 3, 32, 0).unwrap();

        assert_eq!(grid.coordinate_map.len(), 5);
        let unique: HashSet<_> = grid.coordinate_map.values().map(|i| i.id.clone()).collect();
        assert_eq!(unique.len(), 5);
        assert!(grid.image_at(&"B2".parse().unwrap()).is_some());
        assert!(grid.image_at(&"B3".parse().unwrap()).is_none());

        let composite = image::load_from_memory(&grid.composite).unwrap();
        assert_eq!((composite.width(), composite.height()), (96, 96));
    }

    #[test]
    fn test_oversized_grid_rejected_before_allocation() {
        let dir = TempDir::new().unwrap();
        let images = write_images(dir.path(), 1);

        let err = generate_grid(&images, 99, u32::MAX / 2, 0).unwrap_err();
        assert!(matches!(err, TriageError::Common(sift_common::Error::InvalidInput(_))));
        assert!(generate_grid(&images, 20, 1024, 0).is_err());

        assert_eq!(grid_side(20, 96), Some(1920));
        assert_eq!(grid_side(2, u32::MAX), None);
    }

    #[test]
    fn test_fill_is_deterministic_row_major() {
        let dir = TempDir::new().unwrap();
        let images = write_images(dir.path(), 4);

        let a = generate_grid(&images, 2, 16, 0).unwrap();
        let b = generate_grid(&images, 2, 16, 0).unwrap();

        assert_eq!(a.coordinate_map, b.coordinate_map);
        assert_eq!(a.coordinate_map[&"A2".parse().unwrap()].id, images[1].id);
        assert_eq!(a.coordinate_map[&"B1".parse().unwrap()].id, images[2].id);
    }

    #[test]
    fn test_undecodable_image_reports_its_id() {
        let dir = TempDir::new().unwrap();
        let mut images = write_images(dir.path(), 2);
        let bad_path = dir.path().join("bad.jpg");
        std::fs::write(&bad_path, b"garbage").unwrap();
        images.push(ImageReference::new("bad-id", bad_path, 0, 0));

        match generate_grid(&images, 2, 16, 7) {
            Err(TriageError::ImageDecode { image_id, .. }) => assert_eq!(image_id, "bad-id"),
            other => panic!("expected decode error, got {:?}", other.map(|g| g.grid_index)),
        }
    }

    #[test]
    fn test_rejects_empty_and_oversized_input() {
        let dir = TempDir::new().unwrap();
        let images = write_images(dir.path(), 5);

        assert!(generate_grid(&[], 2, 16, 0).is_err());
        assert!(generate_grid(&images, 2, 16, 0).is_err());
    }

    #[test]
    fn test_partition_chunks_by_capacity() {
        let items: Vec<u32> = (0..10).collect();
        let chunks = partition(&items, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], &[8, 9]);
        assert!(partition(&items, 0).is_empty());
    }
}
