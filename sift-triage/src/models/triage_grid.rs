//! Persisted grid records (one row per generated composite)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Which selection pass a grid belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Coarse,
    Fine,
}

impl Pass {
    pub fn as_str(self) -> &'static str {
        match self {
            Pass::Coarse => "coarse",
            Pass::Fine => "fine",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coarse" => Ok(Pass::Coarse),
            "fine" => Ok(Pass::Fine),
            other => Err(format!("Unknown pass: {}", other)),
        }
    }
}

/// Grid processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridStatus {
    Pending,
    Completed,
    Failed,
}

impl GridStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GridStatus::Pending => "pending",
            GridStatus::Completed => "completed",
            GridStatus::Failed => "failed",
        }
    }
}

impl FromStr for GridStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(GridStatus::Pending),
            "completed" => Ok(GridStatus::Completed),
            "failed" => Ok(GridStatus::Failed),
            other => Err(format!("Unknown grid status: {}", other)),
        }
    }
}

/// Grid row in `triage_grids`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageGridRecord {
    pub job_id: Uuid,
    pub pass: Pass,
    pub grid_index: u32,
    pub dimension: u32,
    pub cell_size_px: u32,
    pub composite_path: PathBuf,
    pub status: GridStatus,
    pub models_succeeded: u32,
    pub models_failed: u32,
    pub error_message: Option<String>,
}
