//! One hosted match: the synchronous state core and the async tick loop
//! that drives it.
//!
//! [`MatchState`] owns the session's [`StateAuthority`]; nothing outside
//! this module can obtain it, so every authoritative transition runs on
//! the match task. Participants talk to it through a [`MatchHandle`]
//! (join/input/leave) and their own [`RpcSender`] (commands).

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::protocol::ServerMsg;

use super::authority::{Authority, InputAuthority, Role, StateAuthority};
use super::clock::{Tick, TickClock};
use super::combat::DamageEvent;
use super::error::{Severity, SyncError};
use super::lifecycle::{PlayerState, Roster};
use super::r#match::{MatchLifecycle, MatchPhase, MatchRules};
use super::replication::{Field, PropertyStore, PropertyUpdate, PropertyValue};
use super::rpc::{Broadcast, Command, Outbox, RpcEnvelope, RpcInbox, RpcSender};
use super::snapshot::{PlayerView, ScoreboardView, SnapshotBuilder};
use super::spawn::SpawnPool;
use super::weapon::WeaponTier;
use super::{InputIntent, PlayerId, Pose, Vec3};

const MAX_NICKNAME_LEN: usize = 24;

/// Authoritative state of one session
pub struct MatchState {
    pub id: Uuid,
    auth: StateAuthority,
    clock: TickClock,
    store: PropertyStore,
    roster: Roster,
    lifecycle: MatchLifecycle,
    spawns: SpawnPool,
    inbox: RpcInbox,
    outbox: Outbox,
    max_hp: f32,
    respawn_delay_ticks: u64,
    freeze_ticks: u64,
    next_player_id: u32,
    users: HashMap<Uuid, PlayerId>,
    last_input_seq: HashMap<PlayerId, u32>,
}

impl MatchState {
    pub fn new(id: Uuid, seed: u64, config: &GameConfig) -> Self {
        let clock = TickClock::new(config.tick_rate);
        let rules = MatchRules {
            min_players: config.min_players,
            max_players: config.max_players,
            kill_limit: config.kill_limit,
            duration_ticks: clock.ticks_for(config.match_duration),
        };

        Self {
            id,
            auth: StateAuthority::grant(id),
            store: PropertyStore::new(id),
            roster: Roster::new(),
            lifecycle: MatchLifecycle::new(rules),
            spawns: SpawnPool::new(config.spawn_points.clone(), seed),
            inbox: RpcInbox::new(),
            outbox: Outbox::new(),
            max_hp: config.max_hp,
            respawn_delay_ticks: clock.ticks_for(config.respawn_delay),
            freeze_ticks: config.spawn_freeze_ticks,
            next_player_id: 1,
            users: HashMap::new(),
            last_input_seq: HashMap::new(),
            clock,
        }
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn phase(&self) -> MatchPhase {
        self.lifecycle.phase()
    }

    pub fn lifecycle(&self) -> &MatchLifecycle {
        &self.lifecycle
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn player_for_user(&self, user_id: &Uuid) -> Option<PlayerId> {
        self.users.get(user_id).copied()
    }

    /// Admit a participant and spawn their player entity
    pub fn admit(&mut self, user_id: Uuid, nickname: &str) -> Result<InputAuthority, SyncError> {
        if self.lifecycle.phase() == MatchPhase::Ended {
            return Err(SyncError::StaleCommand("match has ended"));
        }
        if self.users.contains_key(&user_id) {
            return Err(SyncError::StaleCommand("already in match"));
        }
        if self.lifecycle.is_full(self.roster.len()) {
            return Err(SyncError::MatchFull);
        }

        let player_id = PlayerId(self.next_player_id);
        self.next_player_id += 1;

        let nickname = clean_nickname(nickname, player_id);
        let spawn = self.spawns.join_pose();
        let player = PlayerState::new(player_id, nickname, self.max_hp, spawn);

        self.store.spawn_entity(
            &self.auth,
            player_id,
            player.initial_properties(),
            self.clock.now(),
        )?;
        info!(
            match_id = %self.id,
            player_id = %player_id,
            nickname = %player.nickname,
            "Player joined"
        );
        self.roster.insert(player);
        self.users.insert(user_id, player_id);

        Ok(InputAuthority::grant(self.id, player_id))
    }

    /// Remove a participant; their entity and any pending respawn go away
    pub fn remove(&mut self, authority: &InputAuthority) -> Result<PlayerId, SyncError> {
        if authority.match_id() != self.id {
            return Err(SyncError::ForeignSession);
        }
        let player_id = authority.player_id();
        self.roster
            .remove(player_id)
            .ok_or(SyncError::UnresolvedReference(player_id))?;
        self.store.despawn_entity(&self.auth, player_id)?;
        self.inbox.forget(authority.role());
        self.users.retain(|_, id| *id != player_id);
        self.last_input_seq.remove(&player_id);

        info!(match_id = %self.id, player_id = %player_id, "Player left");
        Ok(player_id)
    }

    /// Record the controlling client's intent and reported pose.
    ///
    /// Returns whether the host accepted it into the player's state.
    pub fn submit_input(
        &mut self,
        authority: &InputAuthority,
        seq: u32,
        intent: InputIntent,
        reported: Option<(Pose, Vec3)>,
    ) -> Result<bool, SyncError> {
        if authority.match_id() != self.id {
            return Err(SyncError::ForeignSession);
        }
        if self.lifecycle.phase() == MatchPhase::Ended {
            return Err(SyncError::StaleCommand("match has ended"));
        }

        let player_id = authority.player_id();
        if !self.roster.contains(player_id) {
            return Err(SyncError::UnresolvedReference(player_id));
        }
        if self
            .last_input_seq
            .get(&player_id)
            .is_some_and(|last| seq <= *last)
        {
            return Err(SyncError::StaleCommand("out-of-order input"));
        }
        self.last_input_seq.insert(player_id, seq);

        let now = self.clock.now();
        let intent = intent.sanitized();
        self.store.write(
            authority,
            player_id,
            Field::Intent,
            PropertyValue::Intent(intent),
            now,
        )?;
        if let Some((pose, _)) = reported.filter(|(p, _)| p.is_finite()) {
            self.store
                .write(authority, player_id, Field::ReportedPose, PropertyValue::Pose(pose), now)?;
        }

        let accepted = match self.roster.get_mut(player_id) {
            Some(player) => player.accept_input(&self.auth, intent, reported, now),
            None => false,
        };
        if accepted {
            self.publish(player_id);
        }
        Ok(accepted)
    }

    /// Execute one command addressed to the state authority
    pub fn handle_command(&mut self, envelope: RpcEnvelope) -> Result<(), SyncError> {
        if !self.inbox.accept(&envelope) {
            return Err(SyncError::StaleCommand("replayed call"));
        }
        if let Role::InputAuthority(sender) = envelope.sender {
            if !self.roster.contains(sender) {
                return Err(SyncError::UnresolvedReference(sender));
            }
        }
        if !self.lifecycle.is_running() {
            return Err(SyncError::StaleCommand("match is not running"));
        }

        let now = self.clock.now();
        match envelope.command {
            Command::RequestDamage {
                target,
                amount,
                attacker,
            } => {
                let event = DamageEvent::new(target, amount, attacker, now);
                let death =
                    self.roster
                        .apply_damage(&self.auth, event, now, self.respawn_delay_ticks)?;
                self.publish(target);

                if let Some(report) = death {
                    debug!(
                        match_id = %self.id,
                        victim = %report.victim,
                        killer = ?report.killer,
                        "Player died"
                    );
                    self.outbox.push(
                        &self.auth,
                        Broadcast::PlayerDied {
                            victim: report.victim,
                            killer: report.killer,
                        },
                    );
                    if let Some(killer) = report.killer {
                        self.publish(killer);
                        if let Some(tier) = report.killer_tier {
                            self.outbox.push(
                                &self.auth,
                                Broadcast::WeaponTierChanged {
                                    player: killer,
                                    tier: tier.index(),
                                },
                            );
                        }
                    }
                }
            }
            Command::RequestWeaponChange { player, tier } => {
                let tier = WeaponTier::from_index(tier)?;
                let state = self
                    .roster
                    .get_mut(player)
                    .ok_or(SyncError::UnresolvedReference(player))?;
                if let Some(tier) = state.override_weapon(&self.auth, tier)? {
                    self.publish(player);
                    self.outbox.push(
                        &self.auth,
                        Broadcast::WeaponTierChanged {
                            player,
                            tier: tier.index(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Advance the clock; commands handled afterwards belong to the new tick
    pub fn begin_tick(&mut self) -> Tick {
        self.clock.advance()
    }

    /// Run the per-tick transitions and collect this tick's broadcasts
    pub fn end_tick(&mut self) -> Vec<Broadcast> {
        let now = self.clock.now();

        if let Some(started) = self
            .lifecycle
            .try_start(&self.auth, self.roster.len(), now)
        {
            self.outbox.push(&self.auth, started);
        }

        if self.lifecycle.is_running() {
            let respawns =
                self.roster
                    .tick_respawns(&self.auth, now, &mut self.spawns, self.freeze_ticks);
            for report in respawns {
                self.publish(report.player);
                self.outbox.push(
                    &self.auth,
                    Broadcast::PlayerRespawned {
                        player: report.player,
                        pose: report.pose,
                    },
                );
                if let Some(tier) = report.tier {
                    self.outbox.push(
                        &self.auth,
                        Broadcast::WeaponTierChanged {
                            player: report.player,
                            tier: tier.index(),
                        },
                    );
                }
            }
        }

        if let Some(summary) = self.lifecycle.check_end(&self.auth, &self.roster, now) {
            self.outbox.push(&self.auth, summary.to_broadcast());
        }

        self.outbox.drain()
    }

    /// Full replicated state for a mirror that just joined
    pub fn full_state(&self) -> Vec<PropertyUpdate> {
        self.store.full_state()
    }

    pub fn player_view(&self, player_id: PlayerId) -> Option<PlayerView> {
        self.roster
            .get(player_id)
            .map(|p| PlayerView::from_player(p, &self.clock))
    }

    pub fn scoreboard(&self) -> ScoreboardView {
        ScoreboardView::build(self.id, &self.clock, &self.lifecycle, &self.roster)
    }

    pub fn time_remaining(&self) -> f32 {
        self.lifecycle.time_remaining(&self.clock)
    }

    fn publish(&mut self, player_id: PlayerId) {
        let now = self.clock.now();
        if let Some(player) = self.roster.get(player_id) {
            if let Err(err) = player.publish(&self.auth, &mut self.store, now) {
                warn!(match_id = %self.id, player_id = %player_id, error = %err, "Failed to publish player state");
            }
        }
    }
}

fn clean_nickname(raw: &str, player_id: PlayerId) -> String {
    let trimmed: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NICKNAME_LEN)
        .collect();
    if trimmed.is_empty() {
        format!("Player{}", player_id)
    } else {
        trimmed
    }
}

/// Routine rejections are expected under latency; the rest point at a
/// misbehaving client
pub fn log_rejection(match_id: Uuid, err: &SyncError, what: &'static str) {
    match err.severity() {
        Severity::Routine => debug!(match_id = %match_id, error = %err, what, "Dropped"),
        Severity::Suspicious => {
            warn!(match_id = %match_id, error = %err, code = err.code(), what, "Rejected")
        }
    }
}

/// Control messages from connection tasks to the match task
pub enum Inbound {
    Join {
        user_id: Uuid,
        nickname: String,
        reply: oneshot::Sender<Result<JoinOutcome, SyncError>>,
    },
    Input {
        authority: InputAuthority,
        seq: u32,
        intent: InputIntent,
        reported: Option<(Pose, Vec3)>,
    },
    Leave {
        authority: InputAuthority,
        reason: String,
    },
}

/// Everything a participant needs after joining
pub struct JoinOutcome {
    pub match_id: Uuid,
    pub player_id: PlayerId,
    pub authority: InputAuthority,
    pub rpc: RpcSender,
    pub events: broadcast::Receiver<ServerMsg>,
    /// `MatchJoined` carrying the full replicated state
    pub welcome: ServerMsg,
}

/// Listing entry for the lobby
#[derive(Debug, Clone, Serialize)]
pub struct MatchInfo {
    pub id: Uuid,
    pub players: usize,
    pub max_players: usize,
    pub phase: MatchPhase,
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    control_tx: mpsc::Sender<Inbound>,
    player_count: Arc<AtomicUsize>,
    max_players: usize,
    closed: Arc<AtomicBool>,
    scoreboard: Arc<RwLock<ScoreboardView>>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Open and not at capacity
    pub fn accepting_players(&self) -> bool {
        !self.is_closed() && self.player_count() < self.max_players
    }

    pub async fn join(&self, user_id: Uuid, nickname: String) -> Result<JoinOutcome, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.control_tx
            .send(Inbound::Join {
                user_id,
                nickname,
                reply,
            })
            .await
            .map_err(|_| SyncError::StaleCommand("match is closed"))?;
        rx.await
            .map_err(|_| SyncError::StaleCommand("match is closed"))?
    }

    /// Queue an input; never waits on the match task
    pub fn submit_input(
        &self,
        authority: &InputAuthority,
        seq: u32,
        intent: InputIntent,
        reported: Option<(Pose, Vec3)>,
    ) -> Result<(), SyncError> {
        self.control_tx
            .try_send(Inbound::Input {
                authority: authority.clone(),
                seq,
                intent,
                reported,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => SyncError::StaleCommand("input queue full"),
                mpsc::error::TrySendError::Closed(_) => SyncError::StaleCommand("match is closed"),
            })
    }

    pub async fn leave(&self, authority: InputAuthority, reason: &str) {
        let _ = self
            .control_tx
            .send(Inbound::Leave {
                authority,
                reason: reason.to_string(),
            })
            .await;
    }

    pub fn scoreboard(&self) -> ScoreboardView {
        self.scoreboard.read().clone()
    }

    pub fn info(&self) -> MatchInfo {
        MatchInfo {
            id: self.id,
            players: self.player_count(),
            max_players: self.max_players,
            phase: self.scoreboard.read().phase,
        }
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }

    /// Find a match with available slots
    pub fn find_available_match(&self) -> Option<MatchHandle> {
        self.matches
            .iter()
            .find(|entry| entry.value().accepting_players())
            .map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<MatchInfo> {
        let mut matches: Vec<MatchInfo> = self.matches.iter().map(|m| m.value().info()).collect();
        matches.sort_by_key(|m| m.id);
        matches
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match task
pub struct GameMatch {
    state: MatchState,
    control_rx: mpsc::Receiver<Inbound>,
    rpc_tx: mpsc::UnboundedSender<RpcEnvelope>,
    rpc_rx: mpsc::UnboundedReceiver<RpcEnvelope>,
    /// Only sender of the event stream; receivers see `Closed` once the task exits
    events_tx: broadcast::Sender<ServerMsg>,
    /// Join and leave notices held until the tick's sync has gone out
    notices: Vec<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    scoreboard: Arc<RwLock<ScoreboardView>>,
    end_linger_ticks: u64,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, seed: u64, config: &GameConfig) -> (Self, MatchHandle) {
        let (control_tx, control_rx) = mpsc::channel(256);
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let scoreboard = Arc::new(RwLock::new(ScoreboardView::empty(id)));

        let handle = MatchHandle {
            id,
            control_tx,
            player_count: player_count.clone(),
            max_players: config.max_players,
            closed: closed.clone(),
            scoreboard: scoreboard.clone(),
        };

        let state = MatchState::new(id, seed, config);
        let end_linger_ticks = state.clock.ticks_for(config.end_linger);
        let game_match = Self {
            state,
            control_rx,
            rpc_tx,
            rpc_rx,
            events_tx,
            notices: Vec::new(),
            snapshot_builder: SnapshotBuilder::new(config.sync_interval_ticks),
            player_count,
            closed,
            scoreboard,
            end_linger_ticks,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the match is over
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, tick_rate = self.state.clock.tick_rate(), "Match hosted");

        let mut tick_interval = interval(self.state.clock.tick_duration());
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut ended_at: Option<Tick> = None;

        loop {
            tick_interval.tick().await;
            let now = self.step();

            if self.state.phase() == MatchPhase::Ended {
                self.closed.store(true, Ordering::Relaxed);
                let ended = *ended_at.get_or_insert(now);
                if ended.until(now) >= self.end_linger_ticks || self.state.roster.is_empty() {
                    info!(match_id = %self.state.id, "Match closed");
                    break;
                }
            } else if self.state.roster.is_empty() && self.state.phase() != MatchPhase::Waiting {
                info!(match_id = %self.state.id, "All players left, closing match");
                break;
            }
        }

        self.closed.store(true, Ordering::Relaxed);
    }

    /// Run one tick and publish its results; returns the tick
    fn step(&mut self) -> Tick {
        let now = self.state.begin_tick();

        self.process_control();
        self.process_rpcs();

        let broadcasts = self.state.end_tick();
        if !broadcasts.is_empty() || !self.notices.is_empty() {
            self.snapshot_builder.force_next();
        }

        // Ship state before the messages that describe it
        if self.snapshot_builder.should_send() {
            if let Some(sync) = self.snapshot_builder.build(now, &mut self.state.store) {
                let _ = self.events_tx.send(sync);
            }
        }
        for notice in self.notices.drain(..) {
            let _ = self.events_tx.send(notice);
        }
        for call in broadcasts {
            let _ = self.events_tx.send(ServerMsg::Rpc { tick: now, call });
        }

        *self.scoreboard.write() = self.state.scoreboard();
        now
    }

    fn process_control(&mut self) {
        while let Ok(msg) = self.control_rx.try_recv() {
            match msg {
                Inbound::Join {
                    user_id,
                    nickname,
                    reply,
                } => {
                    let outcome = self.handle_join(user_id, &nickname);
                    let _ = reply.send(outcome);
                }
                Inbound::Input {
                    authority,
                    seq,
                    intent,
                    reported,
                } => {
                    if let Err(err) = self.state.submit_input(&authority, seq, intent, reported) {
                        log_rejection(self.state.id, &err, "input");
                    }
                }
                Inbound::Leave { authority, reason } => self.handle_leave(&authority, reason),
            }
        }
    }

    fn process_rpcs(&mut self) {
        while let Ok(envelope) = self.rpc_rx.try_recv() {
            let what = envelope.command.policy().name;
            if let Err(err) = self.state.handle_command(envelope) {
                log_rejection(self.state.id, &err, what);
            }
        }
    }

    fn handle_join(&mut self, user_id: Uuid, nickname: &str) -> Result<JoinOutcome, SyncError> {
        let authority = self.state.admit(user_id, nickname)?;
        let player_id = authority.player_id();
        self.player_count
            .store(self.state.player_count(), Ordering::Relaxed);

        let events = self.events_tx.subscribe();
        let nickname = self
            .state
            .roster
            .get(player_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_default();
        self.notices.push(ServerMsg::PlayerJoined {
            player_id,
            nickname,
        });

        Ok(JoinOutcome {
            match_id: self.state.id,
            player_id,
            rpc: RpcSender::new(self.state.id, self.rpc_tx.clone()),
            events,
            welcome: ServerMsg::MatchJoined {
                match_id: self.state.id,
                player_id,
                tick: self.state.now(),
                tick_rate: self.state.clock.tick_rate(),
                state: self.state.full_state(),
            },
            authority,
        })
    }

    fn handle_leave(&mut self, authority: &InputAuthority, reason: String) {
        match self.state.remove(authority) {
            Ok(player_id) => {
                self.player_count
                    .store(self.state.player_count(), Ordering::Relaxed);
                self.notices
                    .push(ServerMsg::PlayerLeft { player_id, reason });
            }
            Err(err) => log_rejection(self.state.id, &err, "leave"),
        }
    }
}
