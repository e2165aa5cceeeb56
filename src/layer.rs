// In-memory set of highlights for the selected score.
// Cache between storage and the visual projection: page switches never re-fetch.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::error::{EngineError, Result};
use crate::geometry::{point_to_percent, PixelRect};
use crate::highlight::{HighlightPatch, HighlightRecord};
use crate::repository::HighlightRepository;
use crate::types::{CanvasSize, Confidence, DocumentId, Point, RecordId};

/// Suppresses duplicate `score-selected` signals for the same document in quick succession.
#[derive(Debug, Clone)]
pub struct ScoreSelection {
    window_ms: u64,
    last: Option<(DocumentId, u64)>,
}

impl ScoreSelection {
    pub fn new(window_ms: u64) -> Self {
        ScoreSelection {
            window_ms,
            last: None,
        }
    }

    /// True when this selection should trigger a load.
    pub fn accept(&mut self, document_id: &DocumentId, now_ms: u64) -> bool {
        if let Some((last_id, at)) = &self.last {
            if last_id == document_id && now_ms.saturating_sub(*at) < self.window_ms {
                return false;
            }
        }
        self.last = Some((document_id.clone(), now_ms));
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct HighlightLayer {
    document_id: Option<DocumentId>,
    records: BTreeMap<RecordId, HighlightRecord>,
    current_page: u32,
}

impl HighlightLayer {
    pub fn new() -> Self {
        HighlightLayer {
            document_id: None,
            records: BTreeMap::new(),
            current_page: 1,
        }
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.document_id.as_ref()
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn set_current_page(&mut self, page: u32) {
        self.current_page = page.max(1);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&HighlightRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &HighlightRecord> {
        self.records.values()
    }

    pub fn records_on_page(&self, page: u32) -> impl Iterator<Item = &HighlightRecord> {
        self.records.values().filter(move |r| r.page == page)
    }

    /// Replace the contents with a freshly loaded document. Unsaved records are skipped.
    pub fn load(&mut self, document_id: DocumentId, records: Vec<HighlightRecord>) {
        self.records = records
            .into_iter()
            .filter(|r| r.document_id == document_id)
            .filter_map(|r| r.id.map(|id| (id, r)))
            .collect();
        self.document_id = Some(document_id);
        self.current_page = 1;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.document_id = None;
        self.current_page = 1;
    }

    /// Insert or replace a persisted record.
    pub fn upsert(&mut self, record: HighlightRecord) -> Result<()> {
        let id = record
            .id
            .ok_or_else(|| EngineError::Validation("cannot show an unsaved highlight".into()))?;
        self.records.insert(id, record);
        Ok(())
    }

    pub fn remove(&mut self, id: RecordId) -> Option<HighlightRecord> {
        self.records.remove(&id)
    }

    /// Top-most highlight under a canvas point: the smallest one containing it.
    pub fn hit_test(&self, point: Point, canvas: CanvasSize) -> Option<RecordId> {
        if !canvas.has_area() {
            return None;
        }
        let (x, y) = point_to_percent(point, canvas);
        self.records_on_page(self.current_page)
            .filter(|r| r.rect.contains(x, y))
            .min_by(|a, b| {
                a.rect
                    .area()
                    .total_cmp(&b.rect.area())
                    .then_with(|| b.id.cmp(&a.id))
            })
            .and_then(|r| r.id)
    }

    /// Handle `score-selected`: bulk rehydrate from storage unless this is a duplicate.
    ///
    /// Returns whether a load happened.
    pub fn select_score(
        &mut self,
        repo: &HighlightRepository,
        selection: &mut ScoreSelection,
        document_id: &DocumentId,
        now_ms: u64,
    ) -> Result<bool> {
        if !selection.accept(document_id, now_ms) {
            debug!("ignoring repeated selection of {document_id}");
            return Ok(false);
        }
        let records = repo.list_by_document(document_id)?;
        info!("loaded {} highlights for {}", records.len(), document_id);
        self.load(document_id.clone(), records);
        Ok(true)
    }

    /// Persist a committed drag on the current page and show it.
    ///
    /// Storage failures propagate; nothing is shown for a highlight that was not saved.
    pub fn add_from_selection(
        &mut self,
        repo: &HighlightRepository,
        rect: PixelRect,
        canvas: CanvasSize,
        confidence: Confidence,
    ) -> Result<Option<RecordId>> {
        let Some(document_id) = self.document_id.clone() else {
            return Err(EngineError::InvalidState("no score selected".into()));
        };
        let draft = HighlightRecord::from_pixel_rect(
            document_id,
            self.current_page,
            rect,
            canvas,
            confidence,
        );
        let Some(id) = repo.create(&draft)? else {
            return Ok(None);
        };
        if let Some(saved) = repo.get(id)? {
            self.upsert(saved)?;
        }
        Ok(Some(id))
    }

    /// Update storage, then mirror the stored result into the layer.
    pub fn update(
        &mut self,
        repo: &HighlightRepository,
        id: RecordId,
        patch: &HighlightPatch,
    ) -> Result<HighlightRecord> {
        let updated = repo.update(id, patch)?;
        if self.document_id.as_ref() == Some(&updated.document_id) {
            self.upsert(updated.clone())?;
        }
        Ok(updated)
    }

    pub fn delete(&mut self, repo: &HighlightRepository, id: RecordId) -> Result<()> {
        repo.delete(id)?;
        self.remove(id);
        Ok(())
    }
}
