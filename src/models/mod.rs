//! Core data models for the answer-script intake service.
//!
//! Content-store bookkeeping (`bucket`, `object`) and the records the
//! pipeline owns (`answer_script`, `memorandum`, `student`). All of them map
//! to SQLite rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod answer_script;
pub mod bucket;
pub mod memorandum;
pub mod object;
pub mod student;

pub use answer_script::{AnswerScript, AnswerScriptUpdate, NewAnswerScript, ProcessingStatus};
pub use memorandum::{Memorandum, NewMemorandum};
pub use object::StoredObject;
pub use student::{RosterEntry, Student};
