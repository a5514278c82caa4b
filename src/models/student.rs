//! Students known to the institution, as seen by identity matching.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub exam_number: String,
}

/// The slice of a student the matcher needs: who, and which exam number.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: Uuid,
    pub exam_number: String,
}

impl From<&Student> for RosterEntry {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            exam_number: student.exam_number.clone(),
        }
    }
}
