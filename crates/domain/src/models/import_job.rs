//! Import job domain model.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Import job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ImportJobStatus {
    /// Statuses a job may be resumed from. `Running` covers a job left behind
    /// by a process restart.
    pub const RESUMABLE: [ImportJobStatus; 2] =
        [ImportJobStatus::Failed, ImportJobStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportJobStatus::Pending => "pending",
            ImportJobStatus::Running => "running",
            ImportJobStatus::Completed => "completed",
            ImportJobStatus::Failed => "failed",
        }
    }

    /// Whether a job in this status may be resumed from its stored cursor.
    pub fn is_resumable(&self) -> bool {
        Self::RESUMABLE.contains(self)
    }
}

impl std::fmt::Display for ImportJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ImportJobStatus::Pending),
            "running" => Ok(ImportJobStatus::Running),
            "completed" => Ok(ImportJobStatus::Completed),
            "failed" => Ok(ImportJobStatus::Failed),
            _ => Err(format!("Unknown import job status: {}", s)),
        }
    }
}

/// A registry import scoped to one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImportJob {
    pub id: i64,
    pub site_id: i64,
    /// Overrides the site's `codeNaf` filter.
    pub naf_code: Option<String>,
    /// Overrides the site's `codeDepartementEtablissement` filter.
    pub department: Option<String>,
    /// Overrides the site's `codeCommuneEtablissement` filter.
    pub city: Option<String>,
    pub status: ImportJobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Registry cursor of the next page to fetch.
    pub cursor: Option<String>,
    pub total_imported: i64,
    pub total_closed: i64,
    pub total_errors: i64,
    pub last_error: Option<String>,
}

impl ImportJob {
    /// Snapshot of the persisted progress.
    pub fn checkpoint(&self) -> ImportCheckpoint {
        ImportCheckpoint {
            cursor: self.cursor.clone(),
            total_imported: self.total_imported,
            total_closed: self.total_closed,
            total_errors: self.total_errors,
            last_error: self.last_error.clone(),
        }
    }

    /// Overwrite the persisted progress with `checkpoint`.
    pub fn apply_checkpoint(&mut self, checkpoint: &ImportCheckpoint) {
        self.cursor = checkpoint.cursor.clone();
        self.total_imported = checkpoint.total_imported;
        self.total_closed = checkpoint.total_closed;
        self.total_errors = checkpoint.total_errors;
        self.last_error = checkpoint.last_error.clone();
    }
}

/// Progress written after each page, as one atomic update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportCheckpoint {
    pub cursor: Option<String>,
    pub total_imported: i64,
    pub total_closed: i64,
    pub total_errors: i64,
    pub last_error: Option<String>,
}

/// Request payload for creating an import job.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateImportJobRequest {
    #[validate(custom(function = "shared::validation::validate_naf_code"))]
    pub naf_code: Option<String>,

    #[validate(custom(function = "shared::validation::validate_department_code"))]
    pub department: Option<String>,

    #[validate(custom(function = "shared::validation::validate_commune_code"))]
    pub city: Option<String>,
}

impl CreateImportJobRequest {
    /// Drop blank overrides so they do not mask site defaults.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            naf_code: clean(self.naf_code),
            department: clean(self.department),
            city: clean(self.city),
        }
    }
}

/// Response for listing import jobs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ListImportJobsResponse {
    pub jobs: Vec<ImportJob>,
    pub total: usize,
}
