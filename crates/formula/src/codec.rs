//! Translation between the nested formula document and the flat chart map.
//!
//! The chart works with a flat map of `tooth -> { surface key -> condition }`. The backend
//! stores the same information as a nested document of gum, whole crown, positional roots with
//! their channels, and five coded segments. This module converts in both directions:
//!
//! | Document location            | Flat key              |
//! |------------------------------|-----------------------|
//! | `gum.status_id`              | `jaw`                 |
//! | `whole.status_id`            | `crown`               |
//! | `roots[n-1].status_id`       | `root_{n}`            |
//! | `roots[n-1].channels[m-1]`   | `channel_{n}_{m}`     |
//! | `segments.mid/rt/rb/lb/lt`   | `pulp/occlusal/distal/cervical/mesial` |
//!
//! Every tooth listed in the document gets a key in the flat map, even with no conditions.
//! Teeth the document does not list get no key.

use crate::wire::{ChannelEntry, FormulaDocument, RootEntry, SegmentMap, StatusRef, ToothEntry};
use crate::{FormulaError, FormulaResult};
use chart_types::{ConditionId, Segment, SurfaceKey, ToothNumber};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;

// ============================================================================
// Public domain-level types
// ============================================================================

/// Conditions recorded on the surfaces of a single tooth.
pub type SurfaceConditions = BTreeMap<SurfaceKey, ConditionId>;

/// Flat chart representation: per-tooth, per-surface conditions.
///
/// Updates return a new map and never touch the receiver, so callers can detect changes by
/// comparing against the map they held before.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToothConditionsMap(BTreeMap<ToothNumber, SurfaceConditions>);

impl ToothConditionsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tooth: ToothNumber) -> Option<&SurfaceConditions> {
        self.0.get(&tooth)
    }

    /// The condition on one surface, if any.
    pub fn condition(&self, tooth: ToothNumber, surface: SurfaceKey) -> Option<&ConditionId> {
        self.0.get(&tooth).and_then(|surfaces| surfaces.get(&surface))
    }

    pub fn contains_tooth(&self, tooth: ToothNumber) -> bool {
        self.0.contains_key(&tooth)
    }

    /// Number of teeth present (including teeth with no conditions).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ToothNumber, SurfaceConditions> {
        self.0.iter()
    }

    /// Returns a copy of this map with `condition` set on one surface.
    ///
    /// The tooth is created if absent. `self` is left unchanged.
    pub fn with_condition(
        &self,
        tooth: ToothNumber,
        surface: SurfaceKey,
        condition: ConditionId,
    ) -> Self {
        let mut next = self.clone();
        next.0.entry(tooth).or_default().insert(surface, condition);
        next
    }

    /// Returns a copy of this map with one surface cleared.
    ///
    /// The tooth keeps its (possibly now empty) entry. `self` is left unchanged.
    pub fn without_condition(&self, tooth: ToothNumber, surface: SurfaceKey) -> Self {
        let mut next = self.clone();
        if let Some(surfaces) = next.0.get_mut(&tooth) {
            surfaces.remove(&surface);
        }
        next
    }

    /// Inserts or replaces a whole tooth.
    pub fn insert_tooth(&mut self, tooth: ToothNumber, surfaces: SurfaceConditions) {
        self.0.insert(tooth, surfaces);
    }
}

impl FromIterator<(ToothNumber, SurfaceConditions)> for ToothConditionsMap {
    fn from_iter<I: IntoIterator<Item = (ToothNumber, SurfaceConditions)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ToothConditionsMap {
    type Item = (&'a ToothNumber, &'a SurfaceConditions);
    type IntoIter = btree_map::Iter<'a, ToothNumber, SurfaceConditions>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Sets one surface condition, returning a new map. See [`ToothConditionsMap::with_condition`].
pub fn apply_condition(
    map: &ToothConditionsMap,
    tooth: ToothNumber,
    surface: SurfaceKey,
    condition: ConditionId,
) -> ToothConditionsMap {
    map.with_condition(tooth, surface, condition)
}

/// A tooth entry that could not be decoded and was left out of the flat map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Position of the entry in the document's `teeth` array.
    pub index: usize,
    pub reason: String,
}

/// Result of decoding a formula document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedFormula {
    pub conditions: ToothConditionsMap,
    pub skipped: Vec<SkippedEntry>,
}

impl DecodedFormula {
    pub fn into_conditions(self) -> ToothConditionsMap {
        self.conditions
    }

    /// True when every tooth entry in the source was decoded.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

// ============================================================================
// Public Formula operations
// ============================================================================

/// Tooth formula operations.
///
/// This is a zero-sized type used for namespacing formula translation. All methods are
/// associated functions and are pure: the same input always yields an equal output.
pub struct Formula;

impl Formula {
    /// Decode a typed formula document into the flat chart map.
    ///
    /// `None` decodes to an empty map. Entries whose `number` is not an FDI tooth are skipped
    /// and reported in [`DecodedFormula::skipped`].
    pub fn decode(doc: Option<&FormulaDocument>) -> DecodedFormula {
        let Some(doc) = doc else {
            return DecodedFormula::default();
        };
        decode_entries(doc.teeth.iter().map(Ok))
    }

    /// Decode an untyped JSON value as received from the backend.
    ///
    /// Each element of `teeth` is deserialised on its own, so one malformed tooth (for example
    /// a non-integer `number`) is skipped without affecting the rest. `null`, `{}`, and a
    /// missing or `null` `teeth` all decode to an empty map.
    pub fn decode_value(value: &Value) -> DecodedFormula {
        let teeth = match value {
            Value::Null => return DecodedFormula::default(),
            Value::Object(fields) => match fields.get("teeth") {
                None | Some(Value::Null) => return DecodedFormula::default(),
                Some(Value::Array(items)) => items,
                Some(other) => {
                    tracing::warn!(
                        "formula `teeth` is not an array (found {}), ignoring",
                        kind(other)
                    );
                    return DecodedFormula::default();
                }
            },
            other => {
                tracing::warn!(
                    "formula document is not an object (found {}), ignoring",
                    kind(other)
                );
                return DecodedFormula::default();
            }
        };

        let parsed: Vec<Result<ToothEntry, String>> = teeth
            .iter()
            .map(|item| ToothEntry::deserialize(item).map_err(|e| e.to_string()))
            .collect();

        decode_entries(parsed.iter().map(|r| r.as_ref().map_err(String::as_str)))
    }

    /// Parse formula JSON text and decode it.
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::InvalidJson`] only if the text is not JSON at all. Schema
    /// problems inside individual tooth entries are reported as skipped entries instead.
    pub fn parse(json_text: &str) -> FormulaResult<DecodedFormula> {
        let value: Value = serde_json::from_str(json_text)?;
        Ok(Self::decode_value(&value))
    }

    /// Parse formula JSON text strictly into a typed document.
    ///
    /// This uses `serde_path_to_error` to report the path of the failing field
    /// (e.g. `teeth[3].number`).
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::Translation`] if any part of the document does not match the
    /// wire schema.
    pub fn parse_document(json_text: &str) -> FormulaResult<FormulaDocument> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|err| {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            FormulaError::Translation(format!("formula schema mismatch at {path}: {source}"))
        })
    }

    /// Encode a flat chart map back into a formula document.
    ///
    /// This is the structural inverse of decoding: each flat key goes back to the location it
    /// is decoded from. Roots and channels are positional, so any gap below the highest
    /// referenced index is filled with an entry carrying no status. Teeth are emitted in
    /// ascending tooth number.
    pub fn encode(map: &ToothConditionsMap) -> FormulaDocument {
        let teeth = map
            .iter()
            .map(|(tooth, surfaces)| encode_tooth(*tooth, surfaces))
            .collect();
        FormulaDocument { teeth }
    }

    /// Encode a flat chart map and render it as JSON text.
    pub fn render(map: &ToothConditionsMap) -> FormulaResult<String> {
        serde_json::to_string(&Self::encode(map)).map_err(|e| {
            FormulaError::Translation(format!("failed to serialise formula document: {e}"))
        })
    }
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn decode_entries<'a, I>(entries: I) -> DecodedFormula
where
    I: Iterator<Item = Result<&'a ToothEntry, &'a str>>,
{
    let mut decoded = DecodedFormula::default();

    for (index, entry) in entries.enumerate() {
        let result = entry
            .map_err(str::to_owned)
            .and_then(|entry| decode_tooth(entry).map_err(|e| e.to_string()));

        match result {
            Ok((tooth, surfaces)) => {
                if decoded.conditions.contains_tooth(tooth) {
                    tracing::debug!("tooth {tooth} listed more than once, keeping the last entry");
                }
                decoded.conditions.insert_tooth(tooth, surfaces);
            }
            Err(reason) => {
                tracing::warn!("skipping formula tooth entry {index}: {reason}");
                decoded.skipped.push(SkippedEntry { index, reason });
            }
        }
    }

    decoded
}

fn decode_tooth(entry: &ToothEntry) -> FormulaResult<(ToothNumber, SurfaceConditions)> {
    let tooth = ToothNumber::from_i64(entry.number)?;
    let mut surfaces = SurfaceConditions::new();

    if let Some(condition) = entry.gum.as_ref().and_then(StatusRef::condition) {
        surfaces.insert(SurfaceKey::Jaw, condition);
    }

    if let Some(condition) = entry.whole.as_ref().and_then(StatusRef::condition) {
        surfaces.insert(SurfaceKey::Crown, condition);
    }

    for (root_index, root) in entry.roots.iter().enumerate() {
        let Ok(root_number) = u8::try_from(root_index + 1) else {
            tracing::warn!("tooth {tooth} has more roots than can be addressed, truncating");
            break;
        };

        if let Some(condition) = root.condition() {
            surfaces.insert(SurfaceKey::Root(root_number), condition);
        }

        for (channel_index, channel) in root.channels.iter().enumerate() {
            let Ok(channel_number) = u8::try_from(channel_index + 1) else {
                break;
            };
            if let Some(condition) = channel.condition() {
                surfaces.insert(SurfaceKey::Channel(root_number, channel_number), condition);
            }
        }
    }

    if let Some(segments) = &entry.segments {
        for segment in Segment::ALL {
            if let Some(condition) = segments.get(segment).and_then(StatusRef::condition) {
                surfaces.insert(SurfaceKey::Segment(segment), condition);
            }
        }
    }

    Ok((tooth, surfaces))
}

fn encode_tooth(tooth: ToothNumber, surfaces: &SurfaceConditions) -> ToothEntry {
    let mut entry = ToothEntry::bare(i64::from(tooth.value()));

    for (surface, condition) in surfaces {
        let status = StatusRef::new(condition);
        match *surface {
            SurfaceKey::Jaw => entry.gum = Some(status),
            SurfaceKey::Crown => entry.whole = Some(status),
            SurfaceKey::Root(root) => {
                let Some(slot) = root_slot(&mut entry.roots, root) else {
                    tracing::warn!("tooth {tooth}: dropping root index 0");
                    continue;
                };
                slot.status_id = status.status_id;
            }
            SurfaceKey::Channel(root, channel) => {
                let slot = root_slot(&mut entry.roots, root)
                    .and_then(|root_entry| channel_slot(&mut root_entry.channels, channel));
                let Some(slot) = slot else {
                    tracing::warn!("tooth {tooth}: dropping channel {root}_{channel}");
                    continue;
                };
                slot.status_id = status.status_id;
            }
            SurfaceKey::Segment(segment) => {
                entry
                    .segments
                    .get_or_insert_with(SegmentMap::default)
                    .set(segment, status);
            }
        }
    }

    entry
}

/// Returns the root at 1-based `number`, padding the array with empty roots as needed.
fn root_slot(roots: &mut Vec<RootEntry>, number: u8) -> Option<&mut RootEntry> {
    let index = usize::from(number).checked_sub(1)?;
    if roots.len() <= index {
        roots.resize_with(index + 1, RootEntry::default);
    }
    roots.get_mut(index)
}

fn channel_slot(channels: &mut Vec<ChannelEntry>, number: u8) -> Option<&mut ChannelEntry> {
    let index = usize::from(number).checked_sub(1)?;
    if channels.len() <= index {
        channels.resize_with(index + 1, ChannelEntry::default);
    }
    channels.get_mut(index)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
