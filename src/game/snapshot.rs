//! Sync batching and read-only views for HUD and scoreboard

use serde::Serialize;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

use super::clock::{format_clock, Tick, TickClock};
use super::lifecycle::{PlayerState, Roster};
use super::r#match::{EndReason, MatchLifecycle, MatchPhase};
use super::replication::PropertyStore;
use super::weapon::WeaponTier;
use super::PlayerId;

/// Decides when property changes are shipped to mirrors
pub struct SnapshotBuilder {
    /// Tick counter since last sync
    ticks_since_snapshot: u32,
    /// Sync interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a sync
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force a sync on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Drain pending changes into a sync message, `None` if nothing changed
    pub fn build(&mut self, tick: Tick, store: &mut PropertyStore) -> Option<ServerMsg> {
        if !store.has_pending_changes() {
            return None;
        }
        Some(ServerMsg::Sync {
            tick,
            updates: store.drain_changes(),
        })
    }
}

/// HUD fields of one player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub nickname: String,
    pub hp: f32,
    pub max_hp: f32,
    pub kills: u32,
    pub deaths: u32,
    pub is_dead: bool,
    pub respawn_remaining: f32,
    /// Rounded up to whole seconds
    pub respawn_countdown: u32,
    pub weapon_tier: WeaponTier,
}

impl PlayerView {
    pub fn from_player(player: &PlayerState, clock: &TickClock) -> Self {
        Self {
            player_id: player.id,
            nickname: player.nickname.clone(),
            hp: player.hp(),
            max_hp: player.max_hp(),
            kills: player.kills(),
            deaths: player.deaths(),
            is_dead: player.is_dead(),
            respawn_remaining: player.respawn_remaining(clock),
            respawn_countdown: player.respawn_remaining_display(clock),
            weapon_tier: player.weapon_tier(),
        }
    }
}

/// Final result as shown on the end screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub reason: EndReason,
    pub winner: Option<PlayerId>,
    pub winner_line: String,
}

/// Scoreboard of one match, players in id order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreboardView {
    pub match_id: Uuid,
    pub phase: MatchPhase,
    pub tick: Tick,
    pub time_remaining: f32,
    pub clock: String,
    pub players: Vec<PlayerView>,
    pub result: Option<ResultView>,
}

impl ScoreboardView {
    pub fn empty(match_id: Uuid) -> Self {
        Self {
            match_id,
            phase: MatchPhase::Waiting,
            tick: Tick::ZERO,
            time_remaining: 0.0,
            clock: format_clock(0.0),
            players: Vec::new(),
            result: None,
        }
    }

    pub fn build(
        match_id: Uuid,
        clock: &TickClock,
        lifecycle: &MatchLifecycle,
        roster: &Roster,
    ) -> Self {
        let time_remaining = lifecycle.time_remaining(clock);
        Self {
            match_id,
            phase: lifecycle.phase(),
            tick: clock.now(),
            time_remaining,
            clock: format_clock(time_remaining),
            players: roster
                .iter()
                .map(|p| PlayerView::from_player(p, clock))
                .collect(),
            result: lifecycle.summary().map(|s| ResultView {
                reason: s.reason,
                winner: s.winner,
                winner_line: s.winner_line(),
            }),
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.player_id == id)
    }

    /// Plain-text table as shown by the in-game scoreboard
    pub fn render_table(&self) -> String {
        if self.players.is_empty() {
            return "Name  \tK\tD\nNo players in room\n".to_string();
        }
        let mut out = String::from("Name  \tK\tD\n");
        for (i, p) in self.players.iter().enumerate() {
            out.push_str(&format!(
                "{:>2}. {:<15} {:>2} / {:>2}\n",
                i + 1,
                p.nickname,
                p.kills,
                p.deaths
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::StateAuthority;
    use crate::game::r#match::MatchRules;
    use crate::game::replication::{Field, PropertyValue};
    use crate::game::spawn::SpawnChoice;
    use crate::game::Pose;

    #[test]
    fn test_should_send_on_interval() {
        let mut builder = SnapshotBuilder::new(3);
        assert!(!builder.should_send());
        assert!(!builder.should_send());
        assert!(builder.should_send());
        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn test_build_skips_empty_sync() {
        let match_id = Uuid::new_v4();
        let auth = StateAuthority::grant(match_id);
        let mut store = PropertyStore::new(match_id);
        let mut builder = SnapshotBuilder::new(1);
        assert!(builder.build(Tick(1), &mut store).is_none());

        store
            .spawn_entity(
                &auth,
                PlayerId(1),
                [(Field::Hp, PropertyValue::Float(100.0))],
                Tick(1),
            )
            .unwrap();
        match builder.build(Tick(2), &mut store) {
            Some(ServerMsg::Sync { tick, updates }) => {
                assert_eq!(tick, Tick(2));
                assert_eq!(updates.len(), 1);
            }
            other => panic!("expected sync, got {other:?}"),
        }
        assert!(builder.build(Tick(3), &mut store).is_none());
    }

    #[test]
    fn test_scoreboard_table() {
        let mut roster = Roster::new();
        let spawn = SpawnChoice {
            pose: Pose::default(),
            anchor: None,
        };
        roster.insert(PlayerState::new(PlayerId(2), "bravo".into(), 100.0, spawn));
        roster.insert(PlayerState::new(PlayerId(1), "alpha".into(), 100.0, spawn));
        let lifecycle = MatchLifecycle::new(MatchRules {
            min_players: 2,
            max_players: 4,
            kill_limit: 10,
            duration_ticks: 300,
        });
        let clock = TickClock::new(30);

        let view = ScoreboardView::build(Uuid::new_v4(), &clock, &lifecycle, &roster);
        assert_eq!(view.players[0].nickname, "alpha");
        assert_eq!(view.clock, "0 : 10");
        assert!(view.player(PlayerId(2)).is_some());

        let table = view.render_table();
        assert!(table.starts_with("Name  \tK\tD\n"));
        assert!(table.contains(" 1. alpha"));
        assert!(table.contains(" 2. bravo"));
    }

    #[test]
    fn test_empty_room_table() {
        let view = ScoreboardView::empty(Uuid::new_v4());
        assert!(view.render_table().contains("No players in room"));
    }
}
