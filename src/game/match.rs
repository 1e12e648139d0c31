//! Match lifecycle: waiting, running, ended
//!
//! Phases only move forward. The end transition produces exactly one
//! summary per session; every later check is a no-op.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use tracing::info;

use super::authority::StateAuthority;
use super::clock::{Tick, TickClock};
use super::lifecycle::Roster;
use super::rpc::Broadcast;
use super::PlayerId;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Waiting for players
    Waiting,
    /// Match in progress
    Running,
    /// Match ended
    Ended,
}

/// Why a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    KillLimitReached,
    TimeExpired,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::KillLimitReached => write!(f, "kill limit reached"),
            EndReason::TimeExpired => write!(f, "time expired"),
        }
    }
}

/// Rules fixed when the match is created
#[derive(Debug, Clone, Copy)]
pub struct MatchRules {
    pub min_players: usize,
    pub max_players: usize,
    /// Zero disables the kill limit
    pub kill_limit: u32,
    pub duration_ticks: u64,
}

/// Winner summary carried by the end broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSummary {
    pub reason: EndReason,
    pub winner: Option<PlayerId>,
    pub winner_name: Option<String>,
    pub winner_kills: u32,
    pub winner_deaths: u32,
    pub end_tick: Tick,
}

impl MatchSummary {
    /// Line shown on the end screen
    pub fn winner_line(&self) -> String {
        match &self.winner_name {
            Some(name) => format!(
                "Winner: {} ({} / {})",
                name, self.winner_kills, self.winner_deaths
            ),
            None => "Winner: N/A".to_string(),
        }
    }

    pub fn to_broadcast(&self) -> Broadcast {
        Broadcast::MatchEnded {
            reason: self.reason,
            winner: self.winner,
            winner_kills: self.winner_kills,
            winner_deaths: self.winner_deaths,
            winner_line: self.winner_line(),
        }
    }
}

/// Match state machine, driven by the state authority once per tick
#[derive(Debug)]
pub struct MatchLifecycle {
    phase: MatchPhase,
    rules: MatchRules,
    start_tick: Option<Tick>,
    end_tick: Option<Tick>,
    summary: Option<MatchSummary>,
}

impl MatchLifecycle {
    pub fn new(rules: MatchRules) -> Self {
        Self {
            phase: MatchPhase::Waiting,
            rules,
            start_tick: None,
            end_tick: None,
            summary: None,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    pub fn start_tick(&self) -> Option<Tick> {
        self.start_tick
    }

    pub fn end_tick(&self) -> Option<Tick> {
        self.end_tick
    }

    pub fn summary(&self) -> Option<&MatchSummary> {
        self.summary.as_ref()
    }

    /// Gameplay commands only apply while running
    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn is_full(&self, connected: usize) -> bool {
        connected >= self.rules.max_players
    }

    /// Seconds of match time left
    pub fn time_remaining(&self, clock: &TickClock) -> f32 {
        match (self.phase, self.end_tick) {
            (MatchPhase::Waiting, _) => clock.seconds(self.rules.duration_ticks),
            (MatchPhase::Running, Some(end)) => clock.seconds_until(end),
            _ => 0.0,
        }
    }

    /// Waiting -> Running once enough participants are connected
    pub fn try_start(
        &mut self,
        _auth: &StateAuthority,
        connected: usize,
        now: Tick,
    ) -> Option<Broadcast> {
        if self.phase != MatchPhase::Waiting || connected < self.rules.min_players.max(1) {
            return None;
        }

        let end = now.offset(self.rules.duration_ticks);
        self.phase = MatchPhase::Running;
        self.start_tick = Some(now);
        self.end_tick = Some(end);

        info!(start_tick = %now, end_tick = %end, connected, "Match running");
        Some(Broadcast::MatchStarted {
            start_tick: now,
            end_tick: end,
        })
    }

    /// Running -> Ended on kill limit or time expiry.
    ///
    /// Returns the summary exactly once per match.
    pub fn check_end(
        &mut self,
        _auth: &StateAuthority,
        roster: &Roster,
        now: Tick,
    ) -> Option<MatchSummary> {
        if self.phase != MatchPhase::Running {
            return None;
        }

        let by_kill_limit = (self.rules.kill_limit > 0)
            .then(|| roster.iter().find(|p| p.kills() >= self.rules.kill_limit))
            .flatten();

        let (reason, winner) = match by_kill_limit {
            Some(player) => (EndReason::KillLimitReached, Some(player)),
            None if self.end_tick.is_some_and(|end| now >= end) => {
                let leader = roster
                    .iter()
                    .min_by_key(|p| (Reverse(p.kills()), p.deaths(), p.id));
                (EndReason::TimeExpired, leader)
            }
            None => return None,
        };

        let summary = MatchSummary {
            reason,
            winner: winner.map(|p| p.id),
            winner_name: winner.map(|p| p.nickname.clone()),
            winner_kills: winner.map(|p| p.kills()).unwrap_or(0),
            winner_deaths: winner.map(|p| p.deaths()).unwrap_or(0),
            end_tick: now,
        };

        self.phase = MatchPhase::Ended;
        self.summary = Some(summary.clone());
        info!(
            reason = %summary.reason,
            winner = ?summary.winner,
            tick = %now,
            "Match ended"
        );
        Some(summary)
    }
}
