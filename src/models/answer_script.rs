//! Represents one scanned answer script and its identity-matching state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

const FILE_NAME_MIN_LEN: usize = 3;
const FILE_NAME_MAX_LEN: usize = 255;
/// Longest scanned exam number a record accepts. The configured exam-number
/// pattern may not allow longer tokens.
pub const SCANNED_EXAM_NUMBER_MAX_LEN: usize = 64;

/// Processing status of an answer script.
///
/// `Processing` is the initial state. `Uploaded` and `Failed` are terminal;
/// `Failed` is reserved for pipeline failures, never for low-confidence matches.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Uploaded,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessingStatus::Processing)
    }
}

/// A single scanned submission, as persisted in the metadata store.
///
/// The record is the system of record for processing status. Student, subject
/// and exam ids are weak references resolved by lookup.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct AnswerScript {
    /// Immutable id generated at creation.
    pub id: Uuid,

    /// Original filename of the uploaded file.
    pub file_name: String,

    /// Key under which the bytes were written to the content store.
    pub object_key: String,

    /// Location reported by the content store.
    pub file_url: Option<String>,

    pub status: ProcessingStatus,

    /// Set only after a successful match or a manual edit.
    pub student_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub exam_id: Option<Uuid>,

    /// Exam number read off the pages by OCR.
    pub scanned_exam_number: Option<String>,

    /// Best similarity score in [0, 1] against the roster.
    pub matching_confidence: Option<f64>,

    /// Stamped once, when a student is first attached.
    pub matched_at: Option<DateTime<Utc>>,

    /// Populated by grading.
    pub total_marks: Option<i64>,
    pub max_marks: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnswerScript {
    /// Structural invariants that must hold for every persisted record:
    /// `matched_at` is present exactly when `student_id` is, and a confidence
    /// never exists without the exam number it scores.
    pub fn is_consistent(&self) -> bool {
        let matched = self.matched_at.is_some() == self.student_id.is_some();
        let scored = self.matching_confidence.is_none() || self.scanned_exam_number.is_some();
        matched && scored
    }
}

/// Fields supplied when the orchestrator creates a record.
#[derive(Clone, Debug)]
pub struct NewAnswerScript {
    pub id: Uuid,
    pub file_name: String,
    pub object_key: String,
    pub file_url: Option<String>,
    pub exam_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
}

impl NewAnswerScript {
    pub fn validate(&self) -> Result<(), String> {
        validate_file_name(&self.file_name)?;
        if self.object_key.is_empty() {
            return Err("object key must not be empty".into());
        }
        Ok(())
    }
}

/// Partial update. Only `Some` fields are applied; everything else keeps its
/// stored value, so concurrent writers touching different fields do not
/// clobber each other.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AnswerScriptUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_exam_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_confidence: Option<f64>,
    /// Only honoured together with `student_id`; otherwise the repository
    /// stamps the current time when a student is first attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_marks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_marks: Option<i64>,
}

impl AnswerScriptUpdate {
    pub fn status(status: ProcessingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Field-level checks that do not need the stored record.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.file_name {
            validate_file_name(name)?;
        }
        if let Some(number) = &self.scanned_exam_number {
            if number.is_empty() || number.chars().count() > SCANNED_EXAM_NUMBER_MAX_LEN {
                return Err(format!(
                    "scanned exam number must be 1-{SCANNED_EXAM_NUMBER_MAX_LEN} characters"
                ));
            }
        }
        if let Some(confidence) = self.matching_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err("matching confidence must be within [0, 1]".into());
            }
        }
        for marks in [self.total_marks, self.max_marks].into_iter().flatten() {
            if marks < 0 {
                return Err("marks must not be negative".into());
            }
        }
        Ok(())
    }
}

fn validate_file_name(name: &str) -> Result<(), String> {
    let len = name.chars().count();
    if !(FILE_NAME_MIN_LEN..=FILE_NAME_MAX_LEN).contains(&len) {
        return Err(format!(
            "file name must be between {FILE_NAME_MIN_LEN} and {FILE_NAME_MAX_LEN} characters"
        ));
    }
    Ok(())
}
