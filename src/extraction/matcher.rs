//! Identity matching: find the exam number in recognized text and resolve it
//! against the roster.
//!
//! Matching is best effort and deterministic. An exact (case-insensitive)
//! roster hit scores 1.0; otherwise the best normalized Levenshtein
//! similarity wins, ties going to the lowest exam number. A student is only
//! attached when the score reaches the acceptance threshold, but the score is
//! recorded either way for manual review.

use crate::{
    config::{CharClass, ExamNumberPattern},
    models::{AnswerScriptUpdate, ProcessingStatus, RosterEntry},
};
use regex::Regex;
use uuid::Uuid;

/// What matching produced for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub scanned_exam_number: Option<String>,
    pub student_id: Option<Uuid>,
    pub confidence: Option<f64>,
}

impl MatchOutcome {
    pub fn no_candidate() -> Self {
        Self {
            scanned_exam_number: None,
            student_id: None,
            confidence: None,
        }
    }

    /// Partial update that finalizes the record as `uploaded`. Fields the
    /// outcome does not know about are left untouched.
    pub fn into_update(self) -> AnswerScriptUpdate {
        AnswerScriptUpdate {
            status: Some(ProcessingStatus::Uploaded),
            scanned_exam_number: self.scanned_exam_number,
            matching_confidence: self.confidence,
            student_id: self.student_id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    pattern: ExamNumberPattern,
    token: Regex,
    threshold: f64,
}

impl IdentityMatcher {
    pub fn new(pattern: ExamNumberPattern, threshold: f64) -> Result<Self, regex::Error> {
        let class = match pattern.char_class {
            CharClass::UpperAlphanumeric => "A-Z0-9",
            CharClass::Alphanumeric => "A-Za-z0-9",
            CharClass::Digits => "0-9",
        };
        let token = Regex::new(&format!(
            r"\b[{class}]{{{},{}}}\b",
            pattern.min_length, pattern.max_length
        ))?;
        Ok(Self {
            pattern,
            token,
            threshold,
        })
    }

    /// First token in `text` that satisfies the exam-number pattern.
    pub fn extract_candidate(&self, text: &str) -> Option<String> {
        self.token
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|token| !self.pattern.require_digit || token.bytes().any(|b| b.is_ascii_digit()))
            .map(str::to_string)
    }

    /// Best roster entry for `candidate` with its similarity in [0, 1].
    pub fn best_match(&self, candidate: &str, roster: &[RosterEntry]) -> Option<(Uuid, f64)> {
        let needle = candidate.to_ascii_uppercase();

        let mut ordered: Vec<&RosterEntry> = roster.iter().collect();
        ordered.sort_by(|a, b| a.exam_number.cmp(&b.exam_number).then(a.id.cmp(&b.id)));

        if let Some(exact) = ordered
            .iter()
            .find(|entry| entry.exam_number.to_ascii_uppercase() == needle)
        {
            return Some((exact.id, 1.0));
        }

        let mut best: Option<(Uuid, f64)> = None;
        for entry in ordered {
            let score =
                strsim::normalized_levenshtein(&needle, &entry.exam_number.to_ascii_uppercase());
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((entry.id, score));
            }
        }
        best
    }

    /// Run the full matching algorithm over recognized text.
    pub fn match_text(&self, text: &str, roster: &[RosterEntry]) -> MatchOutcome {
        let Some(candidate) = self.extract_candidate(text) else {
            return MatchOutcome::no_candidate();
        };

        let (student_id, confidence) = match self.best_match(&candidate, roster) {
            Some((id, score)) if score >= self.threshold => (Some(id), score),
            Some((_, score)) => (None, score),
            None => (None, 0.0),
        };

        MatchOutcome {
            scanned_exam_number: Some(candidate),
            student_id,
            confidence: Some(confidence),
        }
    }
}
