//! Spatial primitives shared by scene objects and action points.
//!
//! Thin wrappers around `nalgebra` so the rest of the crate (and the wire
//! format) does not depend on the exact math types.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D position relative to the parent anchor (or the project origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3D(pub Vector3<f32>);

impl Vector3D {
    /// Convenience constructor.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self(Vector3::new(x, y, z))
    }

    pub fn zero() -> Self {
        Self(Vector3::zeros())
    }

    pub fn x(&self) -> f32 {
        self.0.x
    }

    pub fn y(&self) -> f32 {
        self.0.y
    }

    pub fn z(&self) -> f32 {
        self.0.z
    }
}

impl Default for Vector3D {
    fn default() -> Self {
        Self::zero()
    }
}

/// A rotation, stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation(pub UnitQuaternion<f32>);

impl Orientation {
    /// Builds a normalized orientation from raw quaternion components.
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self(UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
    }

    pub fn identity() -> Self {
        Self(UnitQuaternion::identity())
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3D,
    pub orientation: Orientation,
}

impl Pose {
    pub fn new(position: Vector3D, orientation: Orientation) -> Self {
        Self {
            position,
            orientation,
        }
    }
}
