//! Player lifecycle: hp, death, respawn and score
//!
//! All transitions take the session's [`StateAuthority`], so only the host
//! task can run them. Each transition completes inside one call and is
//! published to the property store before the next sync, which keeps the
//! window between "hp reached zero" and "player is dead" invisible to
//! mirrors.

use std::collections::BTreeMap;
use tracing::debug;

use super::authority::StateAuthority;
use super::clock::{Tick, TickClock};
use super::combat::{CombatSystem, DamageEvent};
use super::error::SyncError;
use super::replication::{Field, PropertyStore, PropertyValue};
use super::spawn::{SpawnChoice, SpawnPool};
use super::weapon::{WeaponProgression, WeaponTier};
use super::{InputIntent, PlayerId, Pose, Vec3};

/// Alive or waiting for respawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    Dead { respawn_at: Tick },
}

/// Result of one damage application
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageOutcome {
    Wounded { hp: f32 },
    Died,
}

/// Authoritative state of one player
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub nickname: String,
    hp: f32,
    max_hp: f32,
    life: LifeState,
    kills: u32,
    deaths: u32,
    weapon: WeaponProgression,
    pose: Pose,
    original_pose: Pose,
    spawn_anchor: Option<usize>,
    velocity: Vec3,
    intent: InputIntent,
    input_frozen_until: Option<Tick>,
}

impl PlayerState {
    pub fn new(id: PlayerId, nickname: String, max_hp: f32, spawn: SpawnChoice) -> Self {
        Self {
            id,
            nickname,
            hp: max_hp,
            max_hp,
            life: LifeState::Alive,
            kills: 0,
            deaths: 0,
            weapon: WeaponProgression::new(),
            pose: spawn.pose,
            original_pose: spawn.pose,
            spawn_anchor: spawn.anchor,
            velocity: Vec3::ZERO,
            intent: InputIntent::default(),
            input_frozen_until: None,
        }
    }

    pub fn hp(&self) -> f32 {
        self.hp
    }

    pub fn max_hp(&self) -> f32 {
        self.max_hp
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.life, LifeState::Dead { .. })
    }

    pub fn life(&self) -> LifeState {
        self.life
    }

    pub fn kills(&self) -> u32 {
        self.kills
    }

    pub fn deaths(&self) -> u32 {
        self.deaths
    }

    pub fn weapon_tier(&self) -> WeaponTier {
        self.weapon.tier()
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn intent(&self) -> InputIntent {
        self.intent
    }

    pub fn spawn_anchor(&self) -> Option<usize> {
        self.spawn_anchor
    }

    pub fn respawn_deadline(&self) -> Option<Tick> {
        match self.life {
            LifeState::Alive => None,
            LifeState::Dead { respawn_at } => Some(respawn_at),
        }
    }

    /// Seconds until respawn, zero while alive
    pub fn respawn_remaining(&self, clock: &TickClock) -> f32 {
        self.respawn_deadline()
            .map(|deadline| clock.seconds_until(deadline))
            .unwrap_or(0.0)
    }

    /// Remaining respawn time rounded up to whole seconds for display
    pub fn respawn_remaining_display(&self, clock: &TickClock) -> u32 {
        self.respawn_remaining(clock).ceil() as u32
    }

    pub fn input_frozen(&self, now: Tick) -> bool {
        self.input_frozen_until.is_some_and(|until| now < until)
    }

    /// Subtract validated damage; a dead player ignores it
    pub fn take_damage(
        &mut self,
        _auth: &StateAuthority,
        amount: f32,
        now: Tick,
        respawn_delay_ticks: u64,
    ) -> Result<DamageOutcome, SyncError> {
        if self.is_dead() {
            return Err(SyncError::StaleCommand("damage on dead player"));
        }

        let (hp, killed) = CombatSystem::apply_damage(self.hp, amount);
        self.hp = hp;
        if !killed {
            return Ok(DamageOutcome::Wounded { hp });
        }

        self.hp = 0.0;
        self.deaths += 1;
        self.velocity = Vec3::ZERO;
        self.life = LifeState::Dead {
            respawn_at: now.offset(respawn_delay_ticks),
        };
        Ok(DamageOutcome::Died)
    }

    /// Credit one kill; returns the new tier if it changed
    pub fn credit_kill(&mut self, _auth: &StateAuthority) -> Option<WeaponTier> {
        self.kills += 1;
        let dead = self.is_dead();
        self.weapon.on_kills_changed(self.kills, dead)
    }

    pub fn respawn_due(&self, now: Tick) -> bool {
        matches!(self.life, LifeState::Dead { respawn_at } if now >= respawn_at)
    }

    /// Bring the player back at `spawn`; returns the tier if a deferred
    /// recompute changed it
    pub fn respawn(
        &mut self,
        _auth: &StateAuthority,
        spawn: SpawnChoice,
        now: Tick,
        freeze_ticks: u64,
    ) -> Option<WeaponTier> {
        self.pose = spawn.pose;
        self.spawn_anchor = spawn.anchor;
        self.hp = self.max_hp;
        self.life = LifeState::Alive;
        self.velocity = Vec3::ZERO;
        self.intent = InputIntent::default();
        self.input_frozen_until = (freeze_ticks > 0).then(|| now.offset(freeze_ticks));
        self.weapon.on_respawn()
    }

    /// Manual tier override
    pub fn override_weapon(
        &mut self,
        _auth: &StateAuthority,
        tier: WeaponTier,
    ) -> Result<Option<WeaponTier>, SyncError> {
        let dead = self.is_dead();
        self.weapon.apply_override(tier, dead)
    }

    /// Accept the controlling client's intent and reported pose.
    ///
    /// Returns false when input is dropped (dead, or frozen after a
    /// respawn teleport).
    pub fn accept_input(
        &mut self,
        _auth: &StateAuthority,
        intent: InputIntent,
        reported: Option<(Pose, Vec3)>,
        now: Tick,
    ) -> bool {
        if self.is_dead() || self.input_frozen(now) {
            return false;
        }
        self.intent = intent.sanitized();
        if let Some((pose, velocity)) = reported.filter(|(p, v)| p.is_finite() && v.is_finite()) {
            self.pose = pose;
            self.velocity = velocity;
        }
        true
    }

    /// Slots created when the player entity spawns
    pub fn initial_properties(&self) -> Vec<(Field, PropertyValue)> {
        let mut properties = vec![
            (Field::Nickname, PropertyValue::Text(self.nickname.clone())),
            (Field::MaxHp, PropertyValue::Float(self.max_hp)),
            (Field::ReportedPose, PropertyValue::Pose(self.pose)),
            (Field::Intent, PropertyValue::Intent(self.intent)),
        ];
        properties.extend(self.state_properties());
        properties
    }

    fn state_properties(&self) -> [(Field, PropertyValue); 7] {
        [
            (Field::Hp, PropertyValue::Float(self.hp)),
            (Field::IsDead, PropertyValue::Bool(self.is_dead())),
            (Field::KillCount, PropertyValue::Count(self.kills)),
            (Field::DeathCount, PropertyValue::Count(self.deaths)),
            (
                Field::RespawnDeadline,
                PropertyValue::Deadline(self.respawn_deadline()),
            ),
            (Field::WeaponTier, PropertyValue::Tier(self.weapon.tier().index())),
            (Field::Pose, PropertyValue::Pose(self.pose)),
        ]
    }

    /// Write every host-owned field to the store
    pub fn publish(
        &self,
        auth: &StateAuthority,
        store: &mut PropertyStore,
        now: Tick,
    ) -> Result<(), SyncError> {
        for (field, value) in self.state_properties() {
            store.write(auth, self.id, field, value, now)?;
        }
        Ok(())
    }
}

/// A death produced by a damage call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeathReport {
    pub victim: PlayerId,
    pub killer: Option<PlayerId>,
    /// New tier of the killer, if the kill changed it
    pub killer_tier: Option<WeaponTier>,
}

/// A completed respawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RespawnReport {
    pub player: PlayerId,
    pub pose: Pose,
    pub tier: Option<WeaponTier>,
}

/// All players of a session, iterated in id order
#[derive(Debug, Default)]
pub struct Roster {
    players: BTreeMap<PlayerId, PlayerState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values()
    }

    pub fn insert(&mut self, player: PlayerState) {
        self.players.insert(player.id, player);
    }

    /// Remove a player; any pending respawn goes with it
    pub fn remove(&mut self, id: PlayerId) -> Option<PlayerState> {
        self.players.remove(&id)
    }

    /// Apply one damage event in arrival order.
    ///
    /// The first call that takes the target to zero runs the death
    /// transition and gets the kill; later calls in the same tick find
    /// the target dead and are stale.
    pub fn apply_damage(
        &mut self,
        auth: &StateAuthority,
        event: DamageEvent,
        now: Tick,
        respawn_delay_ticks: u64,
    ) -> Result<Option<DeathReport>, SyncError> {
        let amount = event.validated_amount()?;
        let target = self
            .players
            .get_mut(&event.target)
            .ok_or(SyncError::UnresolvedReference(event.target))?;

        match target.take_damage(auth, amount, now, respawn_delay_ticks)? {
            DamageOutcome::Wounded { .. } => Ok(None),
            DamageOutcome::Died => {
                let mut report = DeathReport {
                    victim: event.target,
                    killer: None,
                    killer_tier: None,
                };

                if event.attacker == event.target {
                    debug!(player_id = %event.target, "Self-inflicted death, no kill credit");
                } else if let Some(attacker) = self.players.get_mut(&event.attacker) {
                    report.killer = Some(event.attacker);
                    report.killer_tier = attacker.credit_kill(auth);
                } else {
                    debug!(
                        victim = %event.target,
                        attacker = %event.attacker,
                        "Attacker not in session, kill attribution skipped"
                    );
                }

                Ok(Some(report))
            }
        }
    }

    /// Respawn every player whose deadline has been reached
    pub fn tick_respawns(
        &mut self,
        auth: &StateAuthority,
        now: Tick,
        spawns: &mut SpawnPool,
        freeze_ticks: u64,
    ) -> Vec<RespawnReport> {
        let mut reports = Vec::new();
        for player in self.players.values_mut() {
            if !player.respawn_due(now) {
                continue;
            }
            let spawn = spawns.respawn_pose(player.original_pose);
            let tier = player.respawn(auth, spawn, now, freeze_ticks);
            reports.push(RespawnReport {
                player: player.id,
                pose: spawn.pose,
                tier,
            });
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const DELAY: u64 = 90;

    fn spawn_at(x: f32) -> SpawnChoice {
        SpawnChoice {
            pose: Pose::new(Vec3::new(x, 1.0, 0.0), 0.0),
            anchor: None,
        }
    }

    fn roster(ids: &[u32]) -> (Roster, StateAuthority) {
        let mut roster = Roster::new();
        for &id in ids {
            roster.insert(PlayerState::new(
                PlayerId(id),
                format!("Player{}", id),
                100.0,
                spawn_at(id as f32),
            ));
        }
        (roster, StateAuthority::grant(Uuid::new_v4()))
    }

    fn hit(target: u32, amount: f32, attacker: u32) -> DamageEvent {
        DamageEvent::new(PlayerId(target), amount, PlayerId(attacker), Tick(10))
    }

    #[test]
    fn test_three_hits_same_tick_one_kill() {
        let (mut roster, auth) = roster(&[1, 7]);
        let mut deaths = Vec::new();
        let mut stale = 0;
        for _ in 0..3 {
            match roster.apply_damage(&auth, hit(1, 34.0, 7), Tick(10), DELAY) {
                Ok(Some(report)) => deaths.push(report),
                Ok(None) => {}
                Err(SyncError::StaleCommand(_)) => stale += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let victim = roster.get(PlayerId(1)).unwrap();
        assert_eq!(victim.hp(), 0.0);
        assert!(victim.is_dead());
        assert_eq!(victim.deaths(), 1);
        assert_eq!(roster.get(PlayerId(7)).unwrap().kills(), 1);
        assert_eq!(deaths.len(), 1);
        assert_eq!(deaths[0].killer, Some(PlayerId(7)));
        assert_eq!(stale, 0);
    }

    #[test]
    fn test_damage_on_dead_player_is_idempotent() {
        let (mut roster, auth) = roster(&[1, 2]);
        roster
            .apply_damage(&auth, hit(1, 150.0, 2), Tick(10), DELAY)
            .unwrap();
        let before = roster.get(PlayerId(1)).unwrap().clone();

        let err = roster
            .apply_damage(&auth, hit(1, 150.0, 2), Tick(10), DELAY)
            .unwrap_err();
        assert_eq!(err, SyncError::StaleCommand("damage on dead player"));

        let after = roster.get(PlayerId(1)).unwrap();
        assert_eq!(after.hp(), before.hp());
        assert_eq!(after.deaths(), before.deaths());
        assert_eq!(after.respawn_deadline(), before.respawn_deadline());
        assert_eq!(roster.get(PlayerId(2)).unwrap().kills(), 1);
    }

    #[test]
    fn test_first_crossing_call_gets_the_kill() {
        let (mut roster, auth) = roster(&[1, 2, 3]);
        roster.apply_damage(&auth, hit(1, 60.0, 2), Tick(10), DELAY).unwrap();
        let report = roster
            .apply_damage(&auth, hit(1, 60.0, 3), Tick(10), DELAY)
            .unwrap()
            .unwrap();
        assert_eq!(report.killer, Some(PlayerId(3)));
        assert!(roster.apply_damage(&auth, hit(1, 60.0, 2), Tick(10), DELAY).is_err());
        assert_eq!(roster.get(PlayerId(2)).unwrap().kills(), 0);
        assert_eq!(roster.get(PlayerId(3)).unwrap().kills(), 1);
    }

    #[test]
    fn test_negative_damage_rejected() {
        let (mut roster, auth) = roster(&[1, 2]);
        assert!(matches!(
            roster.apply_damage(&auth, hit(1, -50.0, 2), Tick(10), DELAY),
            Err(SyncError::Malformed(_))
        ));
        assert_eq!(roster.get(PlayerId(1)).unwrap().hp(), 100.0);
    }

    #[test]
    fn test_unknown_attacker_still_dies() {
        let (mut roster, auth) = roster(&[1]);
        let report = roster
            .apply_damage(&auth, hit(1, 100.0, 99), Tick(10), DELAY)
            .unwrap()
            .unwrap();
        assert_eq!(report.killer, None);
        assert_eq!(roster.get(PlayerId(1)).unwrap().deaths(), 1);
    }

    #[test]
    fn test_self_damage_gives_no_kill() {
        let (mut roster, auth) = roster(&[1]);
        let report = roster
            .apply_damage(&auth, hit(1, 100.0, 1), Tick(10), DELAY)
            .unwrap()
            .unwrap();
        assert_eq!(report.killer, None);
        let player = roster.get(PlayerId(1)).unwrap();
        assert_eq!(player.kills(), 0);
        assert_eq!(player.deaths(), 1);
    }

    #[test]
    fn test_unknown_target() {
        let (mut roster, auth) = roster(&[1]);
        assert_eq!(
            roster.apply_damage(&auth, hit(5, 10.0, 1), Tick(10), DELAY),
            Err(SyncError::UnresolvedReference(PlayerId(5)))
        );
    }

    #[test]
    fn test_respawn_countdown_and_transition() {
        let (mut roster, auth) = roster(&[1, 2]);
        let mut clock = TickClock::new(30);
        let delay = clock.ticks_for(std::time::Duration::from_secs(3));
        for _ in 0..10 {
            clock.advance();
        }
        let death_tick = clock.now();
        roster
            .apply_damage(&auth, hit(1, 100.0, 2), death_tick, delay)
            .unwrap();

        let mut spawns = SpawnPool::new(Vec::new(), 7);
        let mut last = roster.get(PlayerId(1)).unwrap().respawn_remaining(&clock);
        assert!((last - 3.0).abs() < 1e-4);

        loop {
            clock.advance();
            let remaining = roster.get(PlayerId(1)).unwrap().respawn_remaining(&clock);
            assert!(remaining < last);
            last = remaining;

            let reports = roster.tick_respawns(&auth, clock.now(), &mut spawns, 6);
            if !reports.is_empty() {
                assert_eq!(clock.now(), death_tick.offset(90));
                assert_eq!(remaining, 0.0);
                break;
            }
            assert!(roster.get(PlayerId(1)).unwrap().is_dead());
        }

        let player = roster.get(PlayerId(1)).unwrap();
        assert!(!player.is_dead());
        assert_eq!(player.hp(), player.max_hp());
        assert_eq!(player.respawn_remaining(&clock), 0.0);
        // pool is empty, original pose is reused
        assert_eq!(player.pose(), spawn_at(1.0).pose);
    }

    #[test]
    fn test_respawn_display_rounds_up() {
        let (mut roster, auth) = roster(&[1, 2]);
        let mut clock = TickClock::new(10);
        roster.apply_damage(&auth, hit(1, 100.0, 2), clock.now(), 30).unwrap();
        clock.advance();
        assert_eq!(roster.get(PlayerId(1)).unwrap().respawn_remaining_display(&clock), 3);
    }

    #[test]
    fn test_input_frozen_after_respawn() {
        let (mut roster, auth) = roster(&[1, 2]);
        roster.apply_damage(&auth, hit(1, 100.0, 2), Tick(10), 5).unwrap();

        let moved = Pose::new(Vec3::new(50.0, 0.0, 50.0), 0.0);
        let player = roster.get_mut(PlayerId(1)).unwrap();
        assert!(!player.accept_input(&auth, InputIntent::default(), Some((moved, Vec3::ZERO)), Tick(12)));

        let mut spawns = SpawnPool::new(vec![Pose::new(Vec3::new(-8.0, 0.0, 4.0), 0.0)], 1);
        let reports = roster.tick_respawns(&auth, Tick(15), &mut spawns, 3);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].pose.position, Vec3::new(-8.0, 0.0, 4.0));

        let player = roster.get_mut(PlayerId(1)).unwrap();
        assert_eq!(player.spawn_anchor(), Some(0));
        assert_eq!(player.velocity(), Vec3::ZERO);
        assert!(!player.accept_input(&auth, InputIntent::default(), Some((moved, Vec3::ZERO)), Tick(17)));
        assert_eq!(player.pose().position, Vec3::new(-8.0, 0.0, 4.0));
        assert!(player.accept_input(&auth, InputIntent::default(), Some((moved, Vec3::ZERO)), Tick(18)));
        assert_eq!(player.pose(), moved);
    }

    #[test]
    fn test_kill_while_dead_defers_tier_until_respawn() {
        let (mut roster, auth) = roster(&[1, 2, 3]);
        {
            let shooter = roster.get_mut(PlayerId(2)).unwrap();
            for _ in 0..4 {
                shooter.credit_kill(&auth);
            }
        }
        // shooter dies, its bullet still lands afterwards
        roster.apply_damage(&auth, hit(2, 100.0, 3), Tick(10), 5).unwrap();
        let report = roster
            .apply_damage(&auth, hit(1, 100.0, 2), Tick(11), 5)
            .unwrap()
            .unwrap();
        assert_eq!(report.killer, Some(PlayerId(2)));
        assert_eq!(report.killer_tier, None);
        assert_eq!(roster.get(PlayerId(2)).unwrap().weapon_tier(), WeaponTier::Rifle);

        let mut spawns = SpawnPool::new(Vec::new(), 1);
        let reports = roster.tick_respawns(&auth, Tick(15), &mut spawns, 0);
        let shooter = reports.iter().find(|r| r.player == PlayerId(2)).unwrap();
        assert_eq!(shooter.tier, Some(WeaponTier::Shotgun));
    }

    #[test]
    fn test_hp_bounds_over_random_damage() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(9);
        let (mut roster, auth) = roster(&[1, 2]);
        let mut spawns = SpawnPool::new(Vec::new(), 3);

        for tick in 1..2_000u64 {
            let now = Tick(tick);
            let amount = rng.gen_range(-20.0..60.0);
            let _ = roster.apply_damage(&auth, DamageEvent::new(PlayerId(1), amount, PlayerId(2), now), now, 10);
            roster.tick_respawns(&auth, now, &mut spawns, 0);

            let player = roster.get(PlayerId(1)).unwrap();
            assert!(player.hp() >= 0.0 && player.hp() <= player.max_hp());
            assert_eq!(player.is_dead(), player.respawn_deadline().is_some());
            if player.is_dead() {
                assert_eq!(player.hp(), 0.0);
            }
        }
    }

    #[test]
    fn test_publish_writes_consistent_death() {
        let match_id = Uuid::new_v4();
        let auth = StateAuthority::grant(match_id);
        let mut store = PropertyStore::new(match_id);
        let mut player = PlayerState::new(PlayerId(1), "Player1".into(), 100.0, spawn_at(0.0));
        store
            .spawn_entity(&auth, PlayerId(1), player.initial_properties(), Tick(0))
            .unwrap();
        store.drain_changes();

        player.take_damage(&auth, 100.0, Tick(4), 10).unwrap();
        player.publish(&auth, &mut store, Tick(4)).unwrap();

        assert_eq!(store.read(PlayerId(1), Field::Hp), Some(&PropertyValue::Float(0.0)));
        assert_eq!(store.read(PlayerId(1), Field::IsDead), Some(&PropertyValue::Bool(true)));
        assert_eq!(
            store.read(PlayerId(1), Field::RespawnDeadline),
            Some(&PropertyValue::Deadline(Some(Tick(14))))
        );
        assert_eq!(store.read(PlayerId(1), Field::DeathCount), Some(&PropertyValue::Count(1)));
    }
}
