// Highlight records (persisted truth) and their disposable visual projection.
// Rule: `color` is an alias of `confidence` and the two never disagree after a mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::geometry::{to_percent_rect, to_pixel_rect, PercentRect, PixelRect};
use crate::types::{CanvasBox, CanvasSize, Confidence, DocumentId, RecordId};

/// One user-drawn practice section over a page of a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "HighlightWire")]
pub struct HighlightRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub document_id: DocumentId,
    /// 1-based page number.
    pub page: u32,
    #[serde(flatten)]
    pub rect: PercentRect,
    pub confidence: Confidence,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Lenient wire shape. Older records may carry only `color`, and some hosts send `pdfId`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HighlightWire {
    #[serde(default)]
    id: Option<RecordId>,
    #[serde(default, alias = "pdfId")]
    document_id: Option<DocumentId>,
    #[serde(default = "first_page")]
    page: u32,
    #[serde(flatten)]
    rect: PercentRect,
    #[serde(default)]
    confidence: Option<Confidence>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn first_page() -> u32 {
    1
}

impl TryFrom<HighlightWire> for HighlightRecord {
    type Error = EngineError;

    fn try_from(wire: HighlightWire) -> Result<Self> {
        let confidence = match (wire.confidence, wire.color.as_deref()) {
            (Some(level), _) => level,
            (None, Some(color)) => Confidence::from_color(color)?,
            (None, None) => Confidence::default(),
        };
        Ok(HighlightRecord {
            id: wire.id,
            document_id: wire.document_id.unwrap_or_default(),
            page: wire.page,
            rect: wire.rect,
            confidence,
            color: confidence.color().to_string(),
            title: wire.title,
            notes: wire.notes,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        })
    }
}

impl HighlightRecord {
    /// Unsaved record. The rectangle is clamped into the unit square here, once.
    pub fn draft(
        document_id: DocumentId,
        page: u32,
        rect: PercentRect,
        confidence: Confidence,
    ) -> Self {
        HighlightRecord {
            id: None,
            document_id,
            page: page.max(1),
            rect: rect.clamped(),
            confidence,
            color: confidence.color().to_string(),
            title: None,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Build a draft from a committed drag rectangle on the canvas it was drawn on.
    pub fn from_pixel_rect(
        document_id: DocumentId,
        page: u32,
        rect: PixelRect,
        canvas: CanvasSize,
        confidence: Confidence,
    ) -> Self {
        Self::draft(document_id, page, to_percent_rect(rect, canvas), confidence)
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.document_id.is_empty() {
            return Err(EngineError::Validation(
                "highlight has no documentId".into(),
            ));
        }
        if self.page == 0 {
            return Err(EngineError::Validation("page numbers start at 1".into()));
        }
        if !self.rect.is_within_unit_square() {
            return Err(EngineError::Validation(format!(
                "highlight rectangle {:?} leaves the page",
                self.rect
            )));
        }
        if self.color != self.confidence.color() {
            return Err(EngineError::Validation(format!(
                "color '{}' disagrees with confidence {}",
                self.color,
                self.confidence.as_u8()
            )));
        }
        Ok(())
    }

    pub fn set_confidence(&mut self, confidence: Confidence) {
        self.confidence = confidence;
        self.color = confidence.color().to_string();
    }

    /// Merge a partial update. Confidence wins when both it and color are given.
    pub fn apply_patch(&mut self, patch: &HighlightPatch, now: DateTime<Utc>) -> Result<()> {
        let confidence = match (patch.confidence, patch.color.as_deref()) {
            (Some(level), _) => Some(level),
            (None, Some(color)) => Some(Confidence::from_color(color)?),
            (None, None) => None,
        };
        if let Some(level) = confidence {
            self.set_confidence(level);
        }
        if let Some(title) = &patch.title {
            self.title = non_blank(title);
        }
        if let Some(notes) = &patch.notes {
            self.notes = non_blank(notes);
        }
        self.updated_at = Some(now);
        Ok(())
    }

    /// Project onto the current canvas box.
    pub fn project(&self, canvas: CanvasBox, visible: bool) -> HighlightElement {
        HighlightElement {
            id: self.id,
            page: self.page,
            rect: to_pixel_rect(self.rect, canvas.size, canvas.offset),
            color: self.color.clone(),
            visible,
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Partial update for a stored highlight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Blank strings clear the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl HighlightPatch {
    pub fn confidence(confidence: Confidence) -> Self {
        HighlightPatch {
            confidence: Some(confidence),
            ..Default::default()
        }
    }

    pub fn color(color: impl Into<String>) -> Self {
        HighlightPatch {
            color: Some(color.into()),
            ..Default::default()
        }
    }
}

/// Visual projection handed to the host's renderer. Never the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightElement {
    pub id: Option<RecordId>,
    pub page: u32,
    pub rect: PixelRect,
    pub color: String,
    pub visible: bool,
}
