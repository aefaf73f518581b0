//! Common component types used across benchmarks, sized like the
//! components a real game would move through these code paths.

use tessera_macros::{Component, Resource};

// ==================== Transform Components ====================

/// 3D position component (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 3D velocity component (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Rotation as euler angles (12 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 4x4 transformation matrix (64 bytes).
#[derive(Component, Clone, Copy, Debug)]
pub struct Transform {
    pub matrix: [[f32; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

// ==================== Gameplay Components ====================

/// Health pool (8 bytes).
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Health {
    pub current: u32,
    pub max: u32,
}

/// Sparse marker toggled on and off frequently; sparse storage keeps it
/// out of the archetype identity.
#[derive(Component, Clone, Copy, Debug, Default)]
#[component(storage = "sparse")]
pub struct Stunned;

// ==================== Resources ====================

/// Per-run frame counter used by the schedule benchmarks.
#[derive(Resource, Clone, Copy, Debug, Default)]
pub struct FrameCount(pub u64);
