//! Weapon progression
//!
//! The equipped tier is derived from the kill counter, with a manual
//! override channel. It is cosmetic: nothing here touches hp, damage or
//! the match outcome.

use serde::{Deserialize, Serialize};

use super::error::SyncError;

/// Equipped weapon tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponTier {
    Rifle,
    Shotgun,
    Pistol,
}

impl Default for WeaponTier {
    fn default() -> Self {
        Self::Rifle
    }
}

/// Kills needed to reach shotgun tier
pub const SHOTGUN_KILLS: u32 = 5;
/// Kills needed to reach pistol tier
pub const PISTOL_KILLS: u32 = 10;

impl WeaponTier {
    /// Tier for a kill count.
    ///
    /// 0-4 rifle, 5-9 shotgun, 10 and above pistol. Counts past the last
    /// band stay on the top tier.
    pub fn for_kills(kills: u32) -> Self {
        match kills {
            k if k >= PISTOL_KILLS => WeaponTier::Pistol,
            k if k >= SHOTGUN_KILLS => WeaponTier::Shotgun,
            _ => WeaponTier::Rifle,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            WeaponTier::Rifle => 0,
            WeaponTier::Shotgun => 1,
            WeaponTier::Pistol => 2,
        }
    }

    pub fn from_index(index: u8) -> Result<Self, SyncError> {
        match index {
            0 => Ok(WeaponTier::Rifle),
            1 => Ok(WeaponTier::Shotgun),
            2 => Ok(WeaponTier::Pistol),
            other => Err(SyncError::Malformed(format!("unknown weapon tier {}", other))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WeaponTier::Rifle => "rifle",
            WeaponTier::Shotgun => "shotgun",
            WeaponTier::Pistol => "pistol",
        }
    }
}

/// Per-player progression state, owned by the state authority
#[derive(Debug, Clone, Default)]
pub struct WeaponProgression {
    tier: WeaponTier,
    last_kills: u32,
    /// Kill count moved while the player was dead
    deferred: bool,
}

impl WeaponProgression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(&self) -> WeaponTier {
        self.tier
    }

    /// Recompute after a kill-count change.
    ///
    /// Returns the new tier when it changed. A dead player's tier is frozen;
    /// the recompute is deferred to [`WeaponProgression::on_respawn`].
    pub fn on_kills_changed(&mut self, kills: u32, is_dead: bool) -> Option<WeaponTier> {
        if kills == self.last_kills {
            return None;
        }
        self.last_kills = kills;

        if is_dead {
            self.deferred = true;
            return None;
        }
        self.set(WeaponTier::for_kills(kills))
    }

    /// Manual override; not reconciled back into the kill count
    pub fn apply_override(
        &mut self,
        tier: WeaponTier,
        is_dead: bool,
    ) -> Result<Option<WeaponTier>, SyncError> {
        if is_dead {
            return Err(SyncError::StaleCommand("weapon change while dead"));
        }
        Ok(self.set(tier))
    }

    /// Apply any recompute deferred while dead
    pub fn on_respawn(&mut self) -> Option<WeaponTier> {
        if !std::mem::take(&mut self.deferred) {
            return None;
        }
        self.set(WeaponTier::for_kills(self.last_kills))
    }

    fn set(&mut self, tier: WeaponTier) -> Option<WeaponTier> {
        if tier == self.tier {
            return None;
        }
        self.tier = tier;
        Some(tier)
    }
}
