//! Optimistic single-surface chart edits.
//!
//! An edit is applied to the editor's chart immediately, then the whole chart is encoded and
//! handed to a [`FormulaPersister`]. If persisting fails the editor goes back to the chart it
//! held before the edit, and the outcome carries that previous chart along with the reason.
//!
//! `apply` takes `&mut self`, so nothing else can read the editor while a save is in flight;
//! by the time anyone can observe it again the chart is either committed or rolled back. A save
//! that never finishes because the `apply` future was dropped counts as failed.

use crate::codec::{Formula, ToothConditionsMap};
use crate::wire::FormulaDocument;
use async_trait::async_trait;
use chart_types::{ConditionId, SurfaceKey, ToothNumber};

/// Error type persisters report failures with.
pub type PersistError = Box<dyn std::error::Error + Send + Sync>;

/// Somewhere a chart can be saved, typically the formula endpoint of the API.
#[async_trait]
pub trait FormulaPersister: Send + Sync {
    async fn persist(&self, document: &FormulaDocument) -> Result<(), PersistError>;
}

/// What to do with one surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceChange {
    Set(ConditionId),
    Clear,
}

/// A change to one surface of one tooth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceEdit {
    pub tooth: ToothNumber,
    pub surface: SurfaceKey,
    pub change: SurfaceChange,
}

impl SurfaceEdit {
    pub fn set(tooth: ToothNumber, surface: SurfaceKey, condition: ConditionId) -> Self {
        Self {
            tooth,
            surface,
            change: SurfaceChange::Set(condition),
        }
    }

    pub fn clear(tooth: ToothNumber, surface: SurfaceKey) -> Self {
        Self {
            tooth,
            surface,
            change: SurfaceChange::Clear,
        }
    }

    /// The chart that results from applying this edit to `map`.
    pub fn apply_to(&self, map: &ToothConditionsMap) -> ToothConditionsMap {
        match &self.change {
            SurfaceChange::Set(condition) => {
                map.with_condition(self.tooth, self.surface, condition.clone())
            }
            SurfaceChange::Clear => map.without_condition(self.tooth, self.surface),
        }
    }
}

/// Result of an optimistic edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// The edit was saved; this is the chart now held by the editor.
    Committed(ToothConditionsMap),
    /// Saving failed and the editor was restored to `previous`.
    RolledBack {
        previous: ToothConditionsMap,
        reason: String,
    },
}

impl EditOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, EditOutcome::Committed(_))
    }
}

/// An optimistic edit awaiting its save. Restores the previous chart on drop unless committed.
struct PendingEdit<'a> {
    current: &'a mut ToothConditionsMap,
    previous: Option<ToothConditionsMap>,
}

impl PendingEdit<'_> {
    fn commit(mut self) {
        self.previous = None;
    }
}

impl Drop for PendingEdit<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.current = previous;
        }
    }
}

/// Holds the chart for one view/edit session.
#[derive(Clone, Debug, Default)]
pub struct ChartEditor {
    current: ToothConditionsMap,
}

impl ChartEditor {
    pub fn new(initial: ToothConditionsMap) -> Self {
        Self { current: initial }
    }

    /// The chart as currently held (always a persisted state between edits).
    pub fn conditions(&self) -> &ToothConditionsMap {
        &self.current
    }

    /// Replace the chart, e.g. after re-fetching it from the backend.
    pub fn reload(&mut self, conditions: ToothConditionsMap) {
        self.current = conditions;
    }

    pub fn into_conditions(self) -> ToothConditionsMap {
        self.current
    }

    /// Apply `edit` optimistically and persist the resulting chart.
    pub async fn apply<P>(&mut self, edit: &SurfaceEdit, persister: &P) -> EditOutcome
    where
        P: FormulaPersister + ?Sized,
    {
        let next = edit.apply_to(&self.current);
        let document = Formula::encode(&next);
        let previous = std::mem::replace(&mut self.current, next);
        let pending = PendingEdit {
            current: &mut self.current,
            previous: Some(previous),
        };

        match persister.persist(&document).await {
            Ok(()) => {
                pending.commit();
                tracing::debug!(
                    "saved tooth {} surface {} after edit",
                    edit.tooth,
                    edit.surface
                );
                EditOutcome::Committed(self.current.clone())
            }
            Err(e) => {
                tracing::warn!(
                    "failed to save tooth {} surface {}, rolling back: {e}",
                    edit.tooth,
                    edit.surface
                );
                drop(pending);
                EditOutcome::RolledBack {
                    previous: self.current.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }
}
