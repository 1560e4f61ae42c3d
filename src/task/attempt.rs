//! Verification attempt records.
//!
//! Attempts are append-only: one row per submitted photo, written before the
//! workflow branches on the verdict, never edited or deleted on their own.
//! A task exclusively owns its ordered sequence of attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskId;
use crate::vision::Judgment;

/// Where an attempt's verdict came from.
///
/// Operators use this to separate genuine non-compliance (`model`, `mock`)
/// from backend outages (`infrastructure`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptSource {
    /// Judged by the real vision backend
    Model,
    /// Judged by the deterministic mock fallback
    Mock,
    /// The backend was unreachable or returned garbage; no judgment happened
    Infrastructure,
}

impl AttemptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptSource::Model => "model",
            AttemptSource::Mock => "mock",
            AttemptSource::Infrastructure => "infrastructure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "model" => Some(AttemptSource::Model),
            "mock" => Some(AttemptSource::Mock),
            "infrastructure" => Some(AttemptSource::Infrastructure),
            _ => None,
        }
    }
}

/// One submitted photo plus the judgment returned for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationAttempt {
    pub id: Uuid,
    pub task_id: TaskId,

    /// Raw photo bytes. Not serialized into API responses.
    #[serde(skip)]
    pub image: Vec<u8>,

    pub success: bool,
    pub reasoning: String,
    /// Verdict confidence in [0.0, 1.0]
    pub confidence: f64,
    pub source: AttemptSource,
    pub timestamp: DateTime<Utc>,
}

impl VerificationAttempt {
    /// Record a judgment returned by a verification client.
    pub fn from_judgment(task_id: TaskId, image: Vec<u8>, judgment: &Judgment) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            image,
            success: judgment.success,
            reasoning: judgment.reasoning.clone(),
            confidence: judgment.confidence.clamp(0.0, 1.0),
            source: judgment.source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Record a failed attempt caused by the verification backend itself
    /// rather than by the photo's content.
    pub fn infrastructure_failure(task_id: TaskId, image: Vec<u8>, detail: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            image,
            success: false,
            reasoning: detail,
            confidence: 0.0,
            source: AttemptSource::Infrastructure,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::JudgmentSource;

    #[test]
    fn judgment_confidence_is_clamped() {
        let judgment = Judgment {
            success: true,
            reasoning: "clear match".to_string(),
            confidence: 1.7,
            source: JudgmentSource::Model,
        };
        let attempt = VerificationAttempt::from_judgment(TaskId::new(), vec![1, 2, 3], &judgment);
        assert_eq!(attempt.confidence, 1.0);
        assert_eq!(attempt.source, AttemptSource::Model);
    }

    #[test]
    fn infrastructure_failure_is_tagged_and_unsuccessful() {
        let attempt = VerificationAttempt::infrastructure_failure(
            TaskId::new(),
            vec![0xFF],
            "backend unreachable".to_string(),
        );
        assert!(!attempt.success);
        assert_eq!(attempt.source, AttemptSource::Infrastructure);
        assert_eq!(attempt.confidence, 0.0);
    }

    #[test]
    fn source_round_trips_through_strings() {
        for source in [
            AttemptSource::Model,
            AttemptSource::Mock,
            AttemptSource::Infrastructure,
        ] {
            assert_eq!(AttemptSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(AttemptSource::parse("oracle"), None);
    }
}
