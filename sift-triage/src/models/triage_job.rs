//! Triage job state machine
//!
//! A job moves forward only:
//! PENDING → UPLOADING → PROCESSING{GRID_GENERATION → COARSE_PASS → FINE_PASS} → COMPLETED{COMPLETE}
//!
//! FAILED and CANCELLED are reachable from any non-terminal state. Terminal
//! jobs are immutable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TriageError;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not yet started
    Pending,
    /// Sources being hashed and staged
    Uploading,
    /// Grid pipeline running (see [`JobPhase`])
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Uploading => 1,
            JobStatus::Processing => 2,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "uploading" => Ok(JobStatus::Uploading),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Uploading,
    GridGeneration,
    CoarsePass,
    FinePass,
    Complete,
}

impl JobPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Uploading => "uploading",
            JobPhase::GridGeneration => "grid_generation",
            JobPhase::CoarsePass => "coarse_pass",
            JobPhase::FinePass => "fine_pass",
            JobPhase::Complete => "complete",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(JobPhase::Uploading),
            "grid_generation" => Ok(JobPhase::GridGeneration),
            "coarse_pass" => Ok(JobPhase::CoarsePass),
            "fine_pass" => Ok(JobPhase::FinePass),
            "complete" => Ok(JobPhase::Complete),
            other => Err(format!("Unknown job phase: {}", other)),
        }
    }
}

/// Selection target: a percentage of the input (`"20%"`) or an absolute count (`"25"`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriageTarget {
    Percentage(f64),
    Count(usize),
}

impl TriageTarget {
    /// Number of photos to keep for `total_input` ingested photos
    ///
    /// Percentages round up and keep at least one photo when the input is
    /// non-empty.
    pub fn target_count(&self, total_input: usize) -> usize {
        if total_input == 0 {
            return 0;
        }
        match *self {
            TriageTarget::Percentage(pct) => {
                let exact = pct * total_input as f64 / 100.0;
                // Absorb float noise such as 10.000000000000002
                let count = (exact - 1e-9).ceil().max(1.0) as usize;
                count.min(total_input)
            }
            TriageTarget::Count(count) => count,
        }
    }
}

impl FromStr for TriageTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(pct) = trimmed.strip_suffix('%') {
            let value: f64 = pct
                .trim()
                .parse()
                .map_err(|_| format!("Invalid percentage target: {}", s))?;
            if !(value > 0.0 && value <= 100.0) {
                return Err(format!("Percentage target must be in (0, 100]: {}", s));
            }
            Ok(TriageTarget::Percentage(value))
        } else {
            let count: usize = trimmed
                .parse()
                .map_err(|_| format!("Invalid target (expected \"20%\" or \"25\"): {}", s))?;
            if count == 0 {
                return Err("Target count must be at least 1".to_string());
            }
            Ok(TriageTarget::Count(count))
        }
    }
}

impl TryFrom<String> for TriageTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TriageTarget> for String {
    fn from(target: TriageTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for TriageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriageTarget::Percentage(pct) => write!(f, "{}%", pct),
            TriageTarget::Count(count) => write!(f, "{}", count),
        }
    }
}

/// What the models are asked to look for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Criteria {
    /// Photos that stand out (composition, subject, light)
    #[default]
    Standout,
    /// Technically best photos (focus, exposure)
    Quality,
    /// Free-text description supplied by the user
    Custom(String),
}

impl FromStr for Criteria {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("Criteria must not be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case("standout") {
            Ok(Criteria::Standout)
        } else if trimmed.eq_ignore_ascii_case("quality") {
            Ok(Criteria::Quality)
        } else {
            Ok(Criteria::Custom(trimmed.to_string()))
        }
    }
}

impl TryFrom<String> for Criteria {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Criteria> for String {
    fn from(criteria: Criteria) -> Self {
        criteria.to_string()
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::Standout => f.write_str("standout"),
            Criteria::Quality => f.write_str("quality"),
            Criteria::Custom(text) => f.write_str(text),
        }
    }
}

/// Record of one status/phase change, used for the compare-and-swap update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub job_id: Uuid,
    pub old_status: JobStatus,
    pub old_phase: JobPhase,
    pub new_status: JobStatus,
    pub new_phase: JobPhase,
    pub transitioned_at: DateTime<Utc>,
}

/// Persisted triage job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub target: TriageTarget,
    pub criteria: Criteria,
    /// 1 = coarse only, 2 = coarse then fine
    pub passes: u8,
    /// Source files submitted at intake
    pub source_paths: Vec<PathBuf>,
    /// Run the composite scorer over the final selection
    pub score_selected: bool,

    /// Grids processed so far (all passes)
    pub current_step: u64,
    /// Grids known so far (all passes)
    pub total_steps: u64,

    pub total_input: u64,
    pub pass1_survivors: u64,
    pub final_selected: u64,
    pub grids_processed: u64,
    pub grids_failed: u64,
    pub photos_excluded: u64,
    pub api_calls: u64,
    pub credits_deducted: f64,
    pub max_api_calls: Option<u64>,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl TriageJob {
    /// Create a new pending job
    pub fn new(
        target: TriageTarget,
        criteria: Criteria,
        passes: u8,
        source_paths: Vec<PathBuf>,
        ttl: Duration,
    ) -> Result<Self, TriageError> {
        if !(1..=2).contains(&passes) {
            return Err(TriageError::Common(sift_common::Error::InvalidInput(format!(
                "passes must be 1 or 2, got {}",
                passes
            ))));
        }

        let now = Utc::now();
        Ok(Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Pending,
            phase: JobPhase::Uploading,
            target,
            criteria,
            passes,
            source_paths,
            score_selected: false,
            current_step: 0,
            total_steps: 0,
            total_input: 0,
            pass1_survivors: 0,
            final_selected: 0,
            grids_processed: 0,
            grids_failed: 0,
            photos_excluded: 0,
            api_calls: 0,
            credits_deducted: 0.0,
            max_api_calls: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            expires_at: now + ttl,
        })
    }

    pub fn with_max_api_calls(mut self, max_api_calls: Option<u64>) -> Self {
        self.max_api_calls = max_api_calls;
        self
    }

    pub fn with_scoring(mut self, score_selected: bool) -> Self {
        self.score_selected = score_selected;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Eligible for garbage collection
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at && self.status != JobStatus::Processing
    }

    /// Move to a new status/phase
    ///
    /// Forward-only; `Failed`/`Cancelled` keep the current phase and are
    /// accepted from any non-terminal state.
    pub fn transition_to(
        &mut self,
        status: JobStatus,
        phase: JobPhase,
    ) -> Result<StateTransition, TriageError> {
        let invalid = || TriageError::InvalidTransition {
            from: format!("{}/{}", self.status, self.phase),
            to: format!("{}/{}", status, phase),
        };

        if self.is_terminal() {
            return Err(invalid());
        }

        let phase = match status {
            JobStatus::Failed | JobStatus::Cancelled => self.phase,
            _ => phase,
        };

        if !matches!(status, JobStatus::Failed | JobStatus::Cancelled) {
            let completes = status == JobStatus::Completed;
            if completes != (phase == JobPhase::Complete) {
                return Err(invalid());
            }
            if status.rank() < self.status.rank() || phase < self.phase {
                return Err(invalid());
            }
            if status == self.status && phase == self.phase {
                return Err(invalid());
            }
        }

        let now = Utc::now();
        let transition = StateTransition {
            job_id: self.job_id,
            old_status: self.status,
            old_phase: self.phase,
            new_status: status,
            new_phase: phase,
            transitioned_at: now,
        };

        self.status = status;
        self.phase = phase;
        if status == JobStatus::Processing && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.completed_at = Some(now);
        }

        Ok(transition)
    }

    /// Transition to FAILED recording the reason
    pub fn fail(&mut self, message: impl Into<String>) -> Result<StateTransition, TriageError> {
        let transition = self.transition_to(JobStatus::Failed, self.phase)?;
        self.error_message = Some(message.into());
        Ok(transition)
    }

    /// Transition to CANCELLED
    pub fn cancel(&mut self) -> Result<StateTransition, TriageError> {
        self.transition_to(JobStatus::Cancelled, self.phase)
    }

    /// Photos that reached evaluation (ingested minus excluded)
    pub fn photos_evaluated(&self) -> u64 {
        self.total_input.saturating_sub(self.photos_excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(passes: u8) -> TriageJob {
        TriageJob::new(
            TriageTarget::Percentage(20.0),
            Criteria::Standout,
            passes,
            vec![],
            Duration::hours(1),
        )
        .unwrap()
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("20%".parse::<TriageTarget>().unwrap(), TriageTarget::Percentage(20.0));
        assert_eq!(" 25 ".parse::<TriageTarget>().unwrap(), TriageTarget::Count(25));
        assert!("0".parse::<TriageTarget>().is_err());
        assert!("150%".parse::<TriageTarget>().is_err());
        assert!("many".parse::<TriageTarget>().is_err());
    }

    #[test]
    fn test_target_count_rounds_up_with_minimum_one() {
        assert_eq!(TriageTarget::Percentage(20.0).target_count(50), 10);
        assert_eq!(TriageTarget::Percentage(10.0).target_count(15), 2);
        assert_eq!(TriageTarget::Percentage(1.0).target_count(3), 1);
        assert_eq!(TriageTarget::Percentage(20.0).target_count(0), 0);
        assert_eq!(TriageTarget::Count(25).target_count(10), 25);
    }

    #[test]
    fn test_criteria_parsing() {
        assert_eq!("Standout".parse::<Criteria>().unwrap(), Criteria::Standout);
        assert_eq!("quality".parse::<Criteria>().unwrap(), Criteria::Quality);
        assert_eq!(
            "dogs playing outside".parse::<Criteria>().unwrap(),
            Criteria::Custom("dogs playing outside".to_string())
        );
        assert!("  ".parse::<Criteria>().is_err());
        assert_eq!(Criteria::default(), Criteria::Standout);
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job(2);
        job.transition_to(JobStatus::Uploading, JobPhase::Uploading).unwrap();
        job.transition_to(JobStatus::Processing, JobPhase::GridGeneration).unwrap();
        assert!(job.started_at.is_some());
        job.transition_to(JobStatus::Processing, JobPhase::CoarsePass).unwrap();
        job.transition_to(JobStatus::Processing, JobPhase::FinePass).unwrap();
        let t = job.transition_to(JobStatus::Completed, JobPhase::Complete).unwrap();
        assert_eq!(t.old_phase, JobPhase::FinePass);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut job = job(2);
        job.transition_to(JobStatus::Uploading, JobPhase::Uploading).unwrap();
        job.transition_to(JobStatus::Processing, JobPhase::CoarsePass).unwrap();

        let err = job
            .transition_to(JobStatus::Processing, JobPhase::GridGeneration)
            .unwrap_err();
        assert!(matches!(err, TriageError::InvalidTransition { .. }));
        assert_eq!(job.phase, JobPhase::CoarsePass);
    }

    #[test]
    fn test_completed_requires_complete_phase() {
        let mut job = job(1);
        job.transition_to(JobStatus::Processing, JobPhase::CoarsePass).unwrap();
        assert!(job
            .transition_to(JobStatus::Completed, JobPhase::CoarsePass)
            .is_err());
        assert!(job
            .transition_to(JobStatus::Processing, JobPhase::Complete)
            .is_err());
    }

    #[test]
    fn test_failure_from_any_non_terminal_state_and_terminal_is_immutable() {
        let mut job = job(1);
        job.fail("boom").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.phase, JobPhase::Uploading);
        assert_eq!(job.error_message.as_deref(), Some("boom"));

        assert!(job.cancel().is_err());
        assert!(job
            .transition_to(JobStatus::Processing, JobPhase::CoarsePass)
            .is_err());
    }

    #[test]
    fn test_expiry_skips_processing_jobs() {
        let mut job = job(1);
        let later = job.expires_at + Duration::seconds(1);
        assert!(job.is_expired(later));

        job.transition_to(JobStatus::Processing, JobPhase::GridGeneration).unwrap();
        assert!(!job.is_expired(later));
    }

    #[test]
    fn test_invalid_passes_rejected() {
        let result = TriageJob::new(
            TriageTarget::Count(5),
            Criteria::Quality,
            3,
            vec![],
            Duration::hours(1),
        );
        assert!(result.is_err());
    }
}
