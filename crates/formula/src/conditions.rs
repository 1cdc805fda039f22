//! Condition reference table.
//!
//! Maps a condition id to the label and colour used when drawing or exporting a chart. The
//! registry is an ordinary owned value: whoever needs to register or resolve conditions is
//! handed one (or a shared reference to one). New conditions can be registered at any time,
//! including ids that are already present in a decoded chart.

use crate::{FormulaError, FormulaResult};
use chart_types::ConditionId;
use indexmap::IndexMap;
use serde::Serialize;

/// Colour used for condition ids that are not registered.
pub const FALLBACK_COLOR: &str = "#9e9e9e";

/// Built-in conditions: `(id, label, colour)`.
const BUILT_IN: &[(&str, &str, &str)] = &[
    ("normal", "Healthy", "#ffffff"),
    ("cariesSuperficial", "Superficial caries", "#ffe082"),
    ("cariesMedium", "Medium caries", "#ffb300"),
    ("cariesDeep", "Deep caries", "#e65100"),
    ("pulpitis", "Pulpitis", "#d32f2f"),
    ("periodontitis", "Periodontitis", "#8e24aa"),
    ("gingivitis", "Gingivitis", "#f06292"),
    ("filling", "Filling", "#1e88e5"),
    ("crownMetal", "Metal crown", "#78909c"),
    ("crownCeramic", "Ceramic crown", "#e0f7fa"),
    ("canal", "Root canal treated", "#43a047"),
    ("channelFilled", "Filled channel", "#2e7d32"),
    ("implant", "Implant", "#546e7a"),
    ("missing", "Missing", "#212121"),
    ("extraction", "Planned extraction", "#b71c1c"),
];

/// A registered condition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub id: ConditionId,
    pub label: String,
    /// `#rrggbb`
    pub color: String,
}

/// Registry of known conditions, in registration order.
#[derive(Clone, Debug, Default)]
pub struct ConditionRegistry {
    entries: IndexMap<ConditionId, Condition>,
}

impl ConditionRegistry {
    /// A registry with no conditions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry seeded with the built-in condition set.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for (id, label, color) in BUILT_IN {
            if let Err(e) = registry.register(id, label, color) {
                tracing::error!("invalid built-in condition {id}: {e}");
            }
        }
        registry
    }

    /// Register (or replace) a condition.
    ///
    /// # Returns
    ///
    /// The previously registered condition with the same id, if any.
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::InvalidInput`] if the label is blank or the colour is not
    /// `#rrggbb`, and [`FormulaError::Types`] if the id is blank.
    pub fn register(
        &mut self,
        id: impl AsRef<str>,
        label: impl AsRef<str>,
        color: impl AsRef<str>,
    ) -> FormulaResult<Option<Condition>> {
        let id = ConditionId::new(id)?;
        let label = label.as_ref().trim();
        if label.is_empty() {
            return Err(FormulaError::InvalidInput(format!(
                "condition {id} needs a label"
            )));
        }
        let color = normalise_color(color.as_ref()).ok_or_else(|| {
            FormulaError::InvalidInput(format!(
                "condition {id} colour must be #rrggbb, got '{}'",
                color.as_ref()
            ))
        })?;

        let condition = Condition {
            id: id.clone(),
            label: label.to_owned(),
            color,
        };
        Ok(self.entries.insert(id, condition))
    }

    pub fn resolve(&self, id: &str) -> Option<&Condition> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Display label, falling back to the id itself for unregistered conditions.
    pub fn label_for<'a>(&'a self, id: &'a ConditionId) -> &'a str {
        self.resolve(id.as_str())
            .map(|c| c.label.as_str())
            .unwrap_or_else(|| id.as_str())
    }

    /// Display colour, falling back to [`FALLBACK_COLOR`] for unregistered conditions.
    pub fn color_for(&self, id: &ConditionId) -> &str {
        self.resolve(id.as_str())
            .map(|c| c.color.as_str())
            .unwrap_or(FALLBACK_COLOR)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercases a `#rrggbb` colour, or returns `None` if it is not one.
fn normalise_color(color: &str) -> Option<String> {
    let color = color.trim();
    let hex = color.strip_prefix('#')?;
    if hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(color.to_ascii_lowercase())
    } else {
        None
    }
}
