//! Per-photo triage state

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::ImageReference;

/// One ingested photo of a triage job
///
/// `sequence` is the 0-based ingest position and the stable tie-break key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriagePhoto {
    pub job_id: Uuid,
    pub sequence: u32,
    pub original_filename: String,
    pub storage_path: PathBuf,
    pub content_hash: String,
    pub width: u32,
    pub height: u32,

    /// Coarse grid placement
    pub grid_index: Option<u32>,
    pub grid_coordinate: Option<String>,
    /// Fine grid placement (two-pass jobs only)
    pub fine_grid_index: Option<u32>,
    pub fine_grid_coordinate: Option<String>,

    /// Number of models that picked the photo in each pass
    pub coarse_votes: u32,
    pub fine_votes: u32,

    pub selected_coarse: bool,
    pub selected_fine: bool,
    pub final_selected: bool,
    /// 1-based position in the final selection
    pub final_rank: Option<u32>,

    pub excluded: bool,
    pub exclusion_reason: Option<String>,
}

impl TriagePhoto {
    /// New photo row from an ingested image
    pub fn from_image(job_id: Uuid, sequence: u32, image: &ImageReference) -> Self {
        Self {
            job_id,
            sequence,
            original_filename: image.file_name(),
            storage_path: image.path.clone(),
            content_hash: image.id.clone(),
            width: image.width,
            height: image.height,
            grid_index: None,
            grid_coordinate: None,
            fine_grid_index: None,
            fine_grid_coordinate: None,
            coarse_votes: 0,
            fine_votes: 0,
            selected_coarse: false,
            selected_fine: false,
            final_selected: false,
            final_rank: None,
            excluded: false,
            exclusion_reason: None,
        }
    }

    pub fn image_ref(&self) -> ImageReference {
        ImageReference::new(
            self.content_hash.clone(),
            self.storage_path.clone(),
            self.width,
            self.height,
        )
    }
}
