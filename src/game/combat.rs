//! Damage events and damage arithmetic

use super::clock::Tick;
use super::error::SyncError;
use super::PlayerId;

/// A single damage report, consumed synchronously by the target's lifecycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageEvent {
    pub amount: f32,
    pub attacker: PlayerId,
    pub target: PlayerId,
    pub source_tick: Tick,
}

impl DamageEvent {
    pub fn new(target: PlayerId, amount: f32, attacker: PlayerId, source_tick: Tick) -> Self {
        Self {
            amount,
            attacker,
            target,
            source_tick,
        }
    }

    /// Validated damage amount.
    ///
    /// Negative and non-finite amounts are rejected rather than clamped
    /// into a heal or a no-op subtraction.
    pub fn validated_amount(&self) -> Result<f32, SyncError> {
        if !self.amount.is_finite() {
            return Err(SyncError::Malformed(format!(
                "non-finite damage from player {}",
                self.attacker
            )));
        }
        if self.amount < 0.0 {
            return Err(SyncError::Malformed(format!(
                "negative damage {} from player {}",
                self.amount, self.attacker
            )));
        }
        Ok(self.amount)
    }
}

/// Damage arithmetic
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage.max(0.0)).max(0.0);
        (new_health, new_health <= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_damage_clamps_at_zero() {
        assert_eq!(CombatSystem::apply_damage(100.0, 34.0), (66.0, false));
        assert_eq!(CombatSystem::apply_damage(32.0, 34.0), (0.0, true));
        assert_eq!(CombatSystem::apply_damage(10.0, 10.0), (0.0, true));
    }

    #[test]
    fn test_apply_damage_never_heals() {
        assert_eq!(CombatSystem::apply_damage(50.0, -20.0), (50.0, false));
    }

    #[test]
    fn test_validated_amount() {
        let event = |amount| DamageEvent::new(PlayerId(1), amount, PlayerId(2), Tick(4));
        assert_eq!(event(12.5).validated_amount(), Ok(12.5));
        assert_eq!(event(0.0).validated_amount(), Ok(0.0));
        assert!(matches!(
            event(-5.0).validated_amount(),
            Err(SyncError::Malformed(_))
        ));
        assert!(event(f32::NAN).validated_amount().is_err());
        assert!(event(f32::INFINITY).validated_amount().is_err());
    }
}
