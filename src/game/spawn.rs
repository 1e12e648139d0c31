//! Spawn anchors

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use super::error::SyncError;
use super::{Pose, Vec3};

/// Half-extent of the square used for join spawns when no pool is configured
const SCATTER_EXTENT: f32 = 5.0;
const SCATTER_HEIGHT: f32 = 1.0;

/// A chosen spawn pose and the anchor it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnChoice {
    pub pose: Pose,
    /// Index into the pool, `None` for a fallback pose
    pub anchor: Option<usize>,
}

/// Fixed pool of spawn points with a seeded picker
#[derive(Debug, Clone)]
pub struct SpawnPool {
    points: Vec<Pose>,
    rng: ChaCha8Rng,
}

impl SpawnPool {
    pub fn new(points: Vec<Pose>, seed: u64) -> Self {
        Self {
            points,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniformly pick an anchor
    pub fn pick(&mut self) -> Result<SpawnChoice, SyncError> {
        if self.points.is_empty() {
            return Err(SyncError::MissingCollaborator("spawn pool"));
        }
        let index = self.rng.gen_range(0..self.points.len());
        Ok(SpawnChoice {
            pose: self.points[index],
            anchor: Some(index),
        })
    }

    /// Pose for a newly joined player
    pub fn join_pose(&mut self) -> SpawnChoice {
        match self.pick() {
            Ok(choice) => choice,
            Err(_) => SpawnChoice {
                pose: Pose::new(
                    Vec3::new(
                        self.rng.gen_range(-SCATTER_EXTENT..SCATTER_EXTENT),
                        SCATTER_HEIGHT,
                        self.rng.gen_range(-SCATTER_EXTENT..SCATTER_EXTENT),
                    ),
                    0.0,
                ),
                anchor: None,
            },
        }
    }

    /// Pose for a respawn; falls back to the player's original pose
    pub fn respawn_pose(&mut self, original: Pose) -> SpawnChoice {
        match self.pick() {
            Ok(choice) => choice,
            Err(err) => {
                warn!(error = %err, "No spawn points configured, respawning at original pose");
                SpawnChoice {
                    pose: original,
                    anchor: None,
                }
            }
        }
    }
}
