//! Tooth surfaces and their flat string keys.

use crate::{TypesError, TypesResult};
use std::fmt;
use std::str::FromStr;

/// One of the five fixed positional segments drawn on a tooth.
///
/// Each segment has a flat surface name used on the chart side and a short code used by the
/// backend formula document. The mapping is fixed in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Pulp,
    Occlusal,
    Distal,
    Cervical,
    Mesial,
}

impl Segment {
    /// All segments, in backend code order (`mid`, `rt`, `rb`, `lb`, `lt`).
    pub const ALL: [Segment; 5] = [
        Segment::Pulp,
        Segment::Occlusal,
        Segment::Distal,
        Segment::Cervical,
        Segment::Mesial,
    ];

    /// Backend segment code.
    pub fn code(self) -> &'static str {
        match self {
            Segment::Pulp => "mid",
            Segment::Occlusal => "rt",
            Segment::Distal => "rb",
            Segment::Cervical => "lb",
            Segment::Mesial => "lt",
        }
    }

    /// Flat surface name.
    pub fn surface_name(self) -> &'static str {
        match self {
            Segment::Pulp => "pulp",
            Segment::Occlusal => "occlusal",
            Segment::Distal => "distal",
            Segment::Cervical => "cervical",
            Segment::Mesial => "mesial",
        }
    }

    pub fn from_code(code: &str) -> TypesResult<Self> {
        match code {
            "mid" => Ok(Segment::Pulp),
            "rt" => Ok(Segment::Occlusal),
            "rb" => Ok(Segment::Distal),
            "lb" => Ok(Segment::Cervical),
            "lt" => Ok(Segment::Mesial),
            other => Err(TypesError::InvalidSegmentCode(other.to_owned())),
        }
    }

    fn from_surface_name(name: &str) -> Option<Self> {
        Segment::ALL
            .into_iter()
            .find(|segment| segment.surface_name() == name)
    }
}

/// A surface of a tooth that can independently carry a condition.
///
/// Root and channel numbers are 1-based positions in the backend arrays. They are not stable
/// identifiers: reordering the backend `roots` array changes which root a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SurfaceKey {
    /// The gum around the tooth (`jaw`).
    Jaw,
    /// The whole tooth (`crown`).
    Crown,
    /// `root_{n}`.
    Root(u8),
    /// `channel_{root}_{channel}`.
    Channel(u8, u8),
    /// One of the five positional segments.
    Segment(Segment),
}

impl SurfaceKey {
    /// Creates a root key, rejecting index 0.
    pub fn root(root: u8) -> TypesResult<Self> {
        if root == 0 {
            return Err(TypesError::InvalidSurfaceKey("root_0".into()));
        }
        Ok(SurfaceKey::Root(root))
    }

    /// Creates a channel key, rejecting index 0 for either part.
    pub fn channel(root: u8, channel: u8) -> TypesResult<Self> {
        if root == 0 || channel == 0 {
            return Err(TypesError::InvalidSurfaceKey(format!(
                "channel_{root}_{channel}"
            )));
        }
        Ok(SurfaceKey::Channel(root, channel))
    }
}

impl fmt::Display for SurfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceKey::Jaw => f.write_str("jaw"),
            SurfaceKey::Crown => f.write_str("crown"),
            SurfaceKey::Root(root) => write!(f, "root_{root}"),
            SurfaceKey::Channel(root, channel) => write!(f, "channel_{root}_{channel}"),
            SurfaceKey::Segment(segment) => f.write_str(segment.surface_name()),
        }
    }
}

impl FromStr for SurfaceKey {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidSurfaceKey(s.to_owned());

        match s {
            "jaw" => return Ok(SurfaceKey::Jaw),
            "crown" => return Ok(SurfaceKey::Crown),
            _ => {}
        }

        if let Some(segment) = Segment::from_surface_name(s) {
            return Ok(SurfaceKey::Segment(segment));
        }

        if let Some(rest) = s.strip_prefix("root_") {
            let root = parse_index(rest).ok_or_else(invalid)?;
            return Ok(SurfaceKey::Root(root));
        }

        if let Some(rest) = s.strip_prefix("channel_") {
            let (root, channel) = rest.split_once('_').ok_or_else(invalid)?;
            let root = parse_index(root).ok_or_else(invalid)?;
            let channel = parse_index(channel).ok_or_else(invalid)?;
            return Ok(SurfaceKey::Channel(root, channel));
        }

        Err(invalid())
    }
}

/// Parses a 1-based decimal index with no sign or padding.
fn parse_index(text: &str) -> Option<u8> {
    if text.is_empty() || text.starts_with('0') || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl serde::Serialize for SurfaceKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for SurfaceKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
