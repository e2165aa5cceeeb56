// Practice plans: ordered references to highlights with per-section target times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{DocumentId, RecordId};

/// One step of a practice plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSection {
    pub highlight_id: RecordId,
    #[serde(default)]
    pub practice_method: String,
    /// Minutes.
    pub target_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PracticeSection {
    pub fn new(highlight_id: RecordId, target_time: f64) -> Self {
        PracticeSection {
            highlight_id,
            practice_method: String::new(),
            target_time,
            notes: None,
        }
    }

    /// Countdown length in whole seconds. Never zero, so a section always gets one tick.
    pub fn target_secs(&self) -> u64 {
        if !self.target_time.is_finite() || self.target_time <= 0.0 {
            return 1;
        }
        ((self.target_time * 60.0).round() as u64).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticePlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(alias = "pdfId")]
    pub score_id: DocumentId,
    #[serde(default)]
    pub name: String,
    /// Minutes, advisory only.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub sections: Vec<PracticeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PracticePlan {
    pub fn new(score_id: DocumentId, name: impl Into<String>, sections: Vec<PracticeSection>) -> Self {
        PracticePlan {
            id: None,
            score_id,
            name: name.into(),
            duration: sections.iter().map(|s| s.target_time.max(0.0)).sum(),
            focus: String::new(),
            sections,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.score_id.is_empty() {
            return Err(EngineError::Validation("practice plan has no scoreId".into()));
        }
        if let Some(bad) = self
            .sections
            .iter()
            .position(|s| !s.target_time.is_finite() || s.target_time < 0.0)
        {
            return Err(EngineError::Validation(format!(
                "section {bad} has an invalid target time"
            )));
        }
        Ok(())
    }

    /// A plan can only drive a session when it has at least one section.
    pub fn ensure_playable(&self) -> Result<()> {
        self.validate()?;
        if self.sections.is_empty() {
            return Err(EngineError::Validation(format!(
                "practice plan '{}' has no sections",
                self.name
            )));
        }
        Ok(())
    }

    pub fn highlight_ids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self.sections.iter().map(|s| s.highlight_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Association row linking a plan to a highlight it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanHighlightLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub plan_id: RecordId,
    pub highlight_id: RecordId,
}
