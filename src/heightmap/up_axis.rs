//! Up axis selection and surface basis

use crate::core::error::Error;
use crate::core::types::{DVec3, Result};

/// The signed primary world axis treated as "up" by a heightmap.
///
/// The numeric ids match the values written to map metadata: negative axes
/// use negative ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpAxis {
    NegZ,
    NegY,
    NegX,
    PosX,
    PosY,
    #[default]
    PosZ,
}

impl UpAxis {
    /// Metadata id for this axis.
    pub fn id(&self) -> i32 {
        match self {
            UpAxis::NegZ => -3,
            UpAxis::NegY => -2,
            UpAxis::NegX => -1,
            UpAxis::PosX => 0,
            UpAxis::PosY => 1,
            UpAxis::PosZ => 2,
        }
    }

    /// Decode a metadata id. Anything outside the six primaries is an error.
    pub fn from_id(id: i32) -> Result<UpAxis> {
        match id {
            -3 => Ok(UpAxis::NegZ),
            -2 => Ok(UpAxis::NegY),
            -1 => Ok(UpAxis::NegX),
            0 => Ok(UpAxis::PosX),
            1 => Ok(UpAxis::PosY),
            2 => Ok(UpAxis::PosZ),
            _ => Err(Error::InvalidUpAxis(id)),
        }
    }

    /// World component index of the up axis, ignoring sign.
    pub fn index(&self) -> usize {
        match self {
            UpAxis::PosX | UpAxis::NegX => 0,
            UpAxis::PosY | UpAxis::NegY => 1,
            UpAxis::PosZ | UpAxis::NegZ => 2,
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, UpAxis::NegX | UpAxis::NegY | UpAxis::NegZ)
    }

    /// Unit normal pointing up.
    pub fn normal(&self) -> DVec3 {
        match self {
            UpAxis::PosX => DVec3::new(1.0, 0.0, 0.0),
            UpAxis::NegX => DVec3::new(-1.0, 0.0, 0.0),
            UpAxis::PosY => DVec3::new(0.0, 1.0, 0.0),
            UpAxis::NegY => DVec3::new(0.0, -1.0, 0.0),
            UpAxis::PosZ => DVec3::new(0.0, 0.0, 1.0),
            UpAxis::NegZ => DVec3::new(0.0, 0.0, -1.0),
        }
    }

    /// First in-plane surface axis. `surface_axis_a().cross(surface_axis_b())`
    /// equals `normal()` exactly.
    pub fn surface_axis_a(&self) -> DVec3 {
        match self {
            UpAxis::PosX => DVec3::new(0.0, 1.0, 0.0),
            UpAxis::NegX => DVec3::new(0.0, 0.0, 1.0),
            UpAxis::PosY => DVec3::new(0.0, 0.0, 1.0),
            UpAxis::NegY => DVec3::new(1.0, 0.0, 0.0),
            UpAxis::PosZ => DVec3::new(1.0, 0.0, 0.0),
            UpAxis::NegZ => DVec3::new(0.0, 1.0, 0.0),
        }
    }

    /// Second in-plane surface axis.
    pub fn surface_axis_b(&self) -> DVec3 {
        match self {
            UpAxis::PosX => DVec3::new(0.0, 0.0, 1.0),
            UpAxis::NegX => DVec3::new(0.0, 1.0, 0.0),
            UpAxis::PosY => DVec3::new(1.0, 0.0, 0.0),
            UpAxis::NegY => DVec3::new(0.0, 0.0, 1.0),
            UpAxis::PosZ => DVec3::new(0.0, 1.0, 0.0),
            UpAxis::NegZ => DVec3::new(1.0, 0.0, 0.0),
        }
    }

    /// World component index of `surface_axis_a()`.
    pub fn surface_index_a(&self) -> usize {
        match self {
            UpAxis::PosX => 1,
            UpAxis::NegX => 2,
            UpAxis::PosY => 2,
            UpAxis::NegY => 0,
            UpAxis::PosZ => 0,
            UpAxis::NegZ => 1,
        }
    }

    /// World component index of `surface_axis_b()`.
    pub fn surface_index_b(&self) -> usize {
        match self {
            UpAxis::PosX => 2,
            UpAxis::NegX => 1,
            UpAxis::PosY => 0,
            UpAxis::NegY => 2,
            UpAxis::PosZ => 1,
            UpAxis::NegZ => 0,
        }
    }

    /// All six primary axes.
    pub fn all() -> [UpAxis; 6] {
        [
            UpAxis::NegZ,
            UpAxis::NegY,
            UpAxis::NegX,
            UpAxis::PosX,
            UpAxis::PosY,
            UpAxis::PosZ,
        ]
    }
}
