// Highlight and practice-plan persistence over the storage collaborator.
// Rule: deleting a highlight and deleting its plan associations happen together or not at all.

use std::rc::Rc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::highlight::{HighlightPatch, HighlightRecord};
use crate::plan::{PlanHighlightLink, PracticePlan};
use crate::storage::{Storage, StorageOp, StoreName};
use crate::types::{DocumentId, RecordId};

/// One delete-style operation inside `delete_many`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BatchOperation {
    /// Delete a highlight and its plan associations.
    DeleteHighlight { id: RecordId },
    /// Delete every highlight association of a practice plan.
    DeletePlanHighlights {
        #[serde(rename = "planId")]
        plan_id: RecordId,
    },
    /// Any operation type the engine does not know. Always fails the batch.
    #[serde(other)]
    Unsupported,
}

impl BatchOperation {
    fn to_storage_ops(&self) -> Result<Vec<StorageOp>> {
        match self {
            BatchOperation::DeleteHighlight { id } => Ok(vec![
                StorageOp::Delete {
                    store: StoreName::Highlights,
                    id: *id,
                },
                StorageOp::DeleteByIndex {
                    store: StoreName::PracticePlanHighlights,
                    index: "highlightId".into(),
                    key: Value::from(id.as_u64()),
                },
            ]),
            BatchOperation::DeletePlanHighlights { plan_id } => {
                Ok(vec![StorageOp::DeleteByIndex {
                    store: StoreName::PracticePlanHighlights,
                    index: "planId".into(),
                    key: Value::from(plan_id.as_u64()),
                }])
            }
            BatchOperation::Unsupported => Err(EngineError::Validation(
                "unsupported batch operation type".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation: BatchOperation,
    /// Records removed across every collection the operation touched.
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResult {
    pub success: bool,
    pub results: Vec<OperationResult>,
}

/// Sort for display: page, then creation time, then id.
pub fn sorted_for_display(mut records: Vec<HighlightRecord>) -> Vec<HighlightRecord> {
    records.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

/// Façade over the storage collaborator. Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct HighlightRepository {
    storage: Rc<dyn Storage>,
    clock: Rc<dyn Clock>,
}

impl HighlightRepository {
    pub fn new(storage: Rc<dyn Storage>, clock: Rc<dyn Clock>) -> Self {
        HighlightRepository { storage, clock }
    }

    /// Persist a new highlight.
    ///
    /// Returns `Ok(None)` without writing when the record has no document id. Storage
    /// failures propagate so the caller can tell the user the highlight was not saved.
    pub fn create(&self, record: &HighlightRecord) -> Result<Option<RecordId>> {
        if record.document_id.is_empty() {
            warn!("refusing to persist highlight without documentId");
            return Ok(None);
        }

        let mut record = record.clone();
        let now = self.clock.now_utc();
        record.id = None;
        record.set_confidence(record.confidence);
        record.created_at.get_or_insert(now);
        record.updated_at = Some(now);
        record.validate()?;

        let id = self
            .storage
            .put(StoreName::Highlights, serde_json::to_value(&record)?)?;
        debug!(
            "created highlight {} on page {} of {}",
            id, record.page, record.document_id
        );
        Ok(Some(id))
    }

    pub fn get(&self, id: RecordId) -> Result<Option<HighlightRecord>> {
        self.storage
            .get(StoreName::Highlights, id)?
            .map(|value| serde_json::from_value(value).map_err(EngineError::from))
            .transpose()
    }

    /// Every highlight of a document. Store order, not display order.
    pub fn list_by_document(&self, document_id: &DocumentId) -> Result<Vec<HighlightRecord>> {
        let values = self.storage.get_by_index(
            StoreName::Highlights,
            "documentId",
            &Value::from(document_id.as_str()),
        )?;

        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match serde_json::from_value::<HighlightRecord>(value) {
                Ok(record) => records.push(record),
                Err(err) => warn!("skipping unreadable highlight for {document_id}: {err}"),
            }
        }
        Ok(records)
    }

    /// Merge a partial update into an existing highlight.
    ///
    /// The read, merge, and write happen inside this call, so two updates to the same
    /// record never interleave fields: the last one wins whole. Only the patched fields
    /// are checked; stored geometry is left exactly as it was written.
    pub fn update(&self, id: RecordId, patch: &HighlightPatch) -> Result<HighlightRecord> {
        let mut record = self
            .get(id)?
            .ok_or_else(|| EngineError::not_found("highlight", id))?;

        record.apply_patch(patch, self.clock.now_utc())?;
        record.id = Some(id);

        self.storage
            .put(StoreName::Highlights, serde_json::to_value(&record)?)?;
        Ok(record)
    }

    /// Delete a highlight and its plan associations. Missing ids are fine.
    pub fn delete(&self, id: RecordId) -> Result<()> {
        self.delete_many(&[BatchOperation::DeleteHighlight { id }])
            .map(|_| ())
    }

    /// Run a batch of deletes as one atomic unit.
    pub fn delete_many(&self, operations: &[BatchOperation]) -> Result<BatchDeleteResult> {
        let mut ops = Vec::new();
        let mut spans = Vec::with_capacity(operations.len());
        for operation in operations {
            let translated = operation.to_storage_ops()?;
            spans.push(translated.len());
            ops.extend(translated);
        }

        let counts = self.storage.apply_atomic(&ops)?;

        let mut offset = 0;
        let results = operations
            .iter()
            .zip(spans)
            .map(|(operation, span)| {
                let deleted: usize = counts
                    .get(offset..offset + span)
                    .map_or(0, |slice| slice.iter().sum());
                offset += span;
                OperationResult {
                    operation: operation.clone(),
                    deleted,
                }
            })
            .collect();

        Ok(BatchDeleteResult {
            success: true,
            results,
        })
    }

    /// Insert or replace a plan and rewrite its association rows.
    pub fn save_plan(&self, plan: &PracticePlan) -> Result<RecordId> {
        plan.validate()?;

        let mut plan = plan.clone();
        let now = self.clock.now_utc();
        plan.created_at.get_or_insert(now);
        plan.updated_at = Some(now);

        match plan.id {
            Some(id) => {
                let mut ops = vec![StorageOp::Put {
                    store: StoreName::PracticePlans,
                    value: serde_json::to_value(&plan)?,
                }];
                ops.extend(self.link_ops(id, &plan)?);
                self.storage.apply_atomic(&ops)?;
                Ok(id)
            }
            None => {
                let id = self
                    .storage
                    .put(StoreName::PracticePlans, serde_json::to_value(&plan)?)?;
                if let Err(err) = self.storage.apply_atomic(&self.link_ops(id, &plan)?) {
                    // Leave no plan behind without its associations.
                    if let Err(cleanup) = self.storage.delete(StoreName::PracticePlans, id) {
                        warn!("failed to remove half-saved plan {id}: {cleanup}");
                    }
                    return Err(err);
                }
                Ok(id)
            }
        }
    }

    fn link_ops(&self, plan_id: RecordId, plan: &PracticePlan) -> Result<Vec<StorageOp>> {
        let mut ops = vec![StorageOp::DeleteByIndex {
            store: StoreName::PracticePlanHighlights,
            index: "planId".into(),
            key: Value::from(plan_id.as_u64()),
        }];
        for highlight_id in plan.highlight_ids() {
            let link = PlanHighlightLink {
                id: None,
                plan_id,
                highlight_id,
            };
            ops.push(StorageOp::Put {
                store: StoreName::PracticePlanHighlights,
                value: serde_json::to_value(&link)?,
            });
        }
        Ok(ops)
    }

    pub fn get_plan(&self, id: RecordId) -> Result<Option<PracticePlan>> {
        self.storage
            .get(StoreName::PracticePlans, id)?
            .map(|value| serde_json::from_value(value).map_err(EngineError::from))
            .transpose()
    }

    pub fn list_plans_by_score(&self, score_id: &DocumentId) -> Result<Vec<PracticePlan>> {
        let values = self.storage.get_by_index(
            StoreName::PracticePlans,
            "scoreId",
            &Value::from(score_id.as_str()),
        )?;
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(EngineError::from))
            .collect()
    }

    pub fn plan_links(&self, plan_id: RecordId) -> Result<Vec<PlanHighlightLink>> {
        let values = self.storage.get_by_index(
            StoreName::PracticePlanHighlights,
            "planId",
            &Value::from(plan_id.as_u64()),
        )?;
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(EngineError::from))
            .collect()
    }

    /// Delete a plan together with its association rows.
    pub fn delete_plan(&self, id: RecordId) -> Result<()> {
        self.storage.apply_atomic(&[
            StorageOp::Delete {
                store: StoreName::PracticePlans,
                id,
            },
            StorageOp::DeleteByIndex {
                store: StoreName::PracticePlanHighlights,
                index: "planId".into(),
                key: Value::from(id.as_u64()),
            },
        ])?;
        Ok(())
    }
}
