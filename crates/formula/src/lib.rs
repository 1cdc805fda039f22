//! Tooth formula wire models and translation helpers.
//!
//! This crate provides **wire models** for the backend's nested tooth formula document and the
//! **translation** between that document and the flat per-tooth, per-surface map the chart
//! works with:
//! - `wire`: the nested `FormulaDocument` exactly as the backend sends it
//! - `codec`: decode (document to flat map), encode (flat map to document), single-surface updates
//! - `conditions`: the condition reference table (labels and colours)
//! - `editor`: optimistic single-surface edits with rollback on persistence failure
//! - `export`: the flattened rows handed to PDF/record exporters
//!
//! Decoding never fails as a whole: a malformed tooth entry is skipped and reported, and every
//! missing optional field means "no condition".

pub mod codec;
pub mod conditions;
pub mod editor;
pub mod export;
pub mod wire;

// Re-export facades
pub use codec::{
    apply_condition, DecodedFormula, Formula, SkippedEntry, SurfaceConditions, ToothConditionsMap,
};
pub use conditions::{Condition, ConditionRegistry};
pub use editor::{
    ChartEditor, EditOutcome, FormulaPersister, PersistError, SurfaceChange, SurfaceEdit,
};
pub use export::ChartRow;
pub use wire::{ChannelEntry, FormulaDocument, RootEntry, SegmentMap, StatusRef, ToothEntry};

// Re-export the primitives every caller needs alongside the codec
pub use chart_types::{ConditionId, Segment, SurfaceKey, ToothNumber, TypesError};

/// Errors returned by the `formula` crate.
#[derive(Debug, thiserror::Error)]
pub enum FormulaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Type alias for Results that can fail with a [`FormulaError`].
pub type FormulaResult<T> = Result<T, FormulaError>;
