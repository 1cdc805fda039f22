//! # Chart Types
//!
//! Validated primitives shared by the dental chart crates.
//!
//! Contains:
//! - [`ToothNumber`]: a tooth in FDI two-digit notation, restricted to the 32 permanent teeth
//! - [`Segment`] and [`SurfaceKey`]: the named surfaces of a tooth that can carry a condition
//! - [`ConditionId`]: the key of a condition in the status reference table
//!
//! Once constructed, each type is guaranteed valid, so downstream crates never re-check
//! tooth ranges or surface key syntax.

mod condition;
mod surface;
mod tooth;

pub use condition::ConditionId;
pub use surface::{Segment, SurfaceKey};
pub use tooth::{ToothNumber, LOWER_ARCH, UPPER_ARCH};

/// Errors that can occur when constructing chart primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    /// The number is not one of the 32 permanent teeth in FDI notation.
    #[error("not a valid FDI tooth number: {0}")]
    InvalidToothNumber(i64),

    /// The condition identifier was empty or contained only whitespace.
    #[error("condition id cannot be empty")]
    EmptyConditionId,

    /// The surface key is not one of the recognised flat keys.
    #[error("unrecognised surface key: '{0}'")]
    InvalidSurfaceKey(String),

    /// The backend segment code is not one of `mid`, `rt`, `rb`, `lb`, `lt`.
    #[error("unrecognised segment code: '{0}'")]
    InvalidSegmentCode(String),
}

/// Type alias for Results that can fail with a [`TypesError`].
pub type TypesResult<T> = Result<T, TypesError>;
