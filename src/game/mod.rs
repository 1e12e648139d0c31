//! Authoritative session simulation

pub mod authority;
pub mod clock;
pub mod combat;
pub mod error;
pub mod lifecycle;
pub mod r#match;
pub mod replication;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod spawn;
pub mod weapon;

pub use authority::{InputAuthority, Role};
pub use error::SyncError;
pub use session::{GameMatch, JoinOutcome, MatchHandle, MatchRegistry};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-local player identifier, assigned in join order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Position plus facing
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    /// Facing in radians
    pub yaw: f32,
}

impl Pose {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self { position, yaw }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.yaw.is_finite()
    }
}

/// Input intent sent by the controlling client every tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputIntent {
    /// Strafe axis (-1.0 left, 1.0 right)
    pub move_x: f32,
    /// Forward axis (-1.0 back, 1.0 forward)
    pub move_y: f32,
    pub jump: bool,
    pub run: bool,
    pub crouch: bool,
    pub aim_yaw_delta: f32,
}

impl InputIntent {
    /// Clamp axes into range, zeroing non-finite components
    pub fn sanitized(self) -> Self {
        let axis = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            move_x: axis(self.move_x),
            move_y: axis(self.move_y),
            aim_yaw_delta: if self.aim_yaw_delta.is_finite() {
                self.aim_yaw_delta
            } else {
                0.0
            },
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_sanitized() {
        let intent = InputIntent {
            move_x: 4.0,
            move_y: f32::NAN,
            aim_yaw_delta: f32::INFINITY,
            jump: true,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(intent.move_x, 1.0);
        assert_eq!(intent.move_y, 0.0);
        assert_eq!(intent.aim_yaw_delta, 0.0);
        assert!(intent.jump);
    }
}
