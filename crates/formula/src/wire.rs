//! Wire models for the backend tooth formula document.
//!
//! These mirror the JSON the backend sends (`GET /formulas/user/{clientId}`, or the `formula`
//! field of an appointment) and accepts on save. They are deliberately lenient:
//! - every field except `number` is optional, and `null` is the same as absent
//! - unknown keys (including unknown segment codes) are ignored
//! - `status_id` may be a string or a number; blank strings are treated as absent
//!
//! Translation to and from the flat chart map lives in [`crate::codec`].

use chart_types::{ConditionId, Segment};
use serde::{Deserialize, Deserializer, Serialize};

/// Top-level formula document: `{ "teeth": [...] }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub teeth: Vec<ToothEntry>,
}

/// One tooth in the formula document.
///
/// `number` is kept as a raw integer here; range checking against the FDI set happens during
/// decoding so a bad tooth can be skipped without rejecting the whole document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToothEntry {
    pub number: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gum: Option<StatusRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whole: Option<StatusRef>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub roots: Vec<RootEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<SegmentMap>,
}

impl ToothEntry {
    /// An entry with no conditions on any surface.
    pub fn bare(number: i64) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }
}

/// Reference to a status in the reference table: `{ "status_id": "..." }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRef {
    #[serde(
        default,
        deserialize_with = "lenient_status_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_id: Option<String>,
}

impl StatusRef {
    pub fn new(condition: &ConditionId) -> Self {
        Self {
            status_id: Some(condition.as_str().to_owned()),
        }
    }

    /// The referenced condition, if one is set.
    pub fn condition(&self) -> Option<ConditionId> {
        self.status_id
            .as_deref()
            .and_then(|id| ConditionId::new(id).ok())
    }
}

/// A root of the tooth. Its 1-based position in `roots` is the root number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    #[serde(
        default,
        deserialize_with = "lenient_status_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_id: Option<String>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub channels: Vec<ChannelEntry>,
}

impl RootEntry {
    pub fn condition(&self) -> Option<ConditionId> {
        self.status_id
            .as_deref()
            .and_then(|id| ConditionId::new(id).ok())
    }
}

/// A channel within a root. Its 1-based position in `channels` is the channel number.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    #[serde(
        default,
        deserialize_with = "lenient_status_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_id: Option<String>,
}

impl ChannelEntry {
    pub fn condition(&self) -> Option<ConditionId> {
        self.status_id
            .as_deref()
            .and_then(|id| ConditionId::new(id).ok())
    }
}

/// The five positional segments keyed by backend code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<StatusRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rt: Option<StatusRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rb: Option<StatusRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb: Option<StatusRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<StatusRef>,
}

impl SegmentMap {
    pub fn get(&self, segment: Segment) -> Option<&StatusRef> {
        self.slot(segment).as_ref()
    }

    pub fn set(&mut self, segment: Segment, status: StatusRef) {
        *self.slot_mut(segment) = Some(status);
    }

    fn slot(&self, segment: Segment) -> &Option<StatusRef> {
        match segment {
            Segment::Pulp => &self.mid,
            Segment::Occlusal => &self.rt,
            Segment::Distal => &self.rb,
            Segment::Cervical => &self.lb,
            Segment::Mesial => &self.lt,
        }
    }

    fn slot_mut(&mut self, segment: Segment) -> &mut Option<StatusRef> {
        match segment {
            Segment::Pulp => &mut self.mid,
            Segment::Occlusal => &mut self.rt,
            Segment::Distal => &mut self.rb,
            Segment::Cervical => &mut self.lb,
            Segment::Mesial => &mut self.lt,
        }
    }
}

// ============================================================================
// Lenient field deserialisers (internal)
// ============================================================================

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStatusId {
    Text(String),
    Number(serde_json::Number),
}

fn lenient_status_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawStatusId>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawStatusId::Text(text)) if !text.trim().is_empty() => Some(text),
        Some(RawStatusId::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}
