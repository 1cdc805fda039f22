//! FDI tooth identifiers.
//!
//! The first digit is the quadrant (1 and 2 upper, 3 and 4 lower) and the second digit is the
//! position within the quadrant (1 = central incisor through 8 = third molar).

use crate::{TypesError, TypesResult};
use std::fmt;
use std::str::FromStr;

/// Upper arch in chart order (patient's right to left).
pub const UPPER_ARCH: [u8; 16] = [
    18, 17, 16, 15, 14, 13, 12, 11, 21, 22, 23, 24, 25, 26, 27, 28,
];

/// Lower arch in chart order (patient's right to left).
pub const LOWER_ARCH: [u8; 16] = [
    48, 47, 46, 45, 44, 43, 42, 41, 31, 32, 33, 34, 35, 36, 37, 38,
];

/// A permanent tooth in FDI notation.
///
/// Ordering is numeric (11 < 12 < ... < 48), which is what map keys use. Use
/// [`ToothNumber::chart_order`] when laying teeth out the way a chart displays them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ToothNumber(u8);

impl ToothNumber {
    /// Creates a tooth number, rejecting anything outside the 32-tooth FDI set.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidToothNumber`] for quadrants outside 1-4 or positions outside
    /// 1-8.
    pub fn new(value: u8) -> TypesResult<Self> {
        if Self::is_valid(i64::from(value)) {
            Ok(Self(value))
        } else {
            Err(TypesError::InvalidToothNumber(i64::from(value)))
        }
    }

    /// Like [`ToothNumber::new`] but accepts any integer, as found in untyped JSON.
    pub fn from_i64(value: i64) -> TypesResult<Self> {
        if Self::is_valid(value) {
            Ok(Self(value as u8))
        } else {
            Err(TypesError::InvalidToothNumber(value))
        }
    }

    /// Returns true if `value` names one of the 32 permanent teeth.
    pub fn is_valid(value: i64) -> bool {
        let quadrant = value / 10;
        let position = value % 10;
        (1..=4).contains(&quadrant) && (1..=8).contains(&position)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Quadrant digit (1-4).
    pub fn quadrant(self) -> u8 {
        self.0 / 10
    }

    /// Position within the quadrant (1 = central incisor, 8 = third molar).
    pub fn position(self) -> u8 {
        self.0 % 10
    }

    pub fn is_upper(self) -> bool {
        self.quadrant() <= 2
    }

    /// All 32 teeth, upper arch then lower arch, each in chart order.
    pub fn chart_order() -> impl Iterator<Item = ToothNumber> {
        UPPER_ARCH
            .into_iter()
            .chain(LOWER_ARCH)
            .map(ToothNumber)
    }
}

impl TryFrom<u8> for ToothNumber {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ToothNumber> for u8 {
    fn from(tooth: ToothNumber) -> Self {
        tooth.0
    }
}

impl fmt::Display for ToothNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ToothNumber {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| TypesError::InvalidToothNumber(-1))?;
        Self::from_i64(value)
    }
}
