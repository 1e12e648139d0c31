//! Remote calls between participants and the state authority
//!
//! Every call declares who may send it and who receives it. The policy is
//! checked on the sending side before anything is queued, so a rejected
//! call never leaves the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::authority::{Authority, Role, StateAuthority};
use super::clock::Tick;
use super::error::SyncError;
use super::r#match::EndReason;
use super::{PlayerId, Pose};

/// Roles allowed to issue a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sources {
    StateAuthority,
    /// The input authority of the player the call is about
    InputAuthorityOfSubject,
    /// Any connected participant, host included
    AnyParticipant,
}

/// Who receives a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets {
    StateAuthority,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcPolicy {
    pub name: &'static str,
    pub sources: Sources,
    pub targets: Targets,
}

impl RpcPolicy {
    pub fn admits(&self, caller: Role, subject: PlayerId) -> bool {
        match (self.sources, caller) {
            (_, Role::Observer) => false,
            (Sources::StateAuthority, role) => role == Role::StateAuthority,
            (Sources::InputAuthorityOfSubject, Role::InputAuthority(owner)) => owner == subject,
            (Sources::InputAuthorityOfSubject, _) => false,
            (Sources::AnyParticipant, _) => true,
        }
    }
}

/// Calls addressed to the state authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rpc", rename_all = "snake_case")]
pub enum Command {
    /// A hit detected locally by some participant
    RequestDamage {
        target: PlayerId,
        amount: f32,
        attacker: PlayerId,
    },
    /// Manual weapon tier override
    RequestWeaponChange { player: PlayerId, tier: u8 },
}

impl Command {
    pub fn policy(&self) -> RpcPolicy {
        match self {
            Command::RequestDamage { .. } => RpcPolicy {
                name: "request_damage",
                sources: Sources::AnyParticipant,
                targets: Targets::StateAuthority,
            },
            Command::RequestWeaponChange { .. } => RpcPolicy {
                name: "request_weapon_change",
                sources: Sources::InputAuthorityOfSubject,
                targets: Targets::StateAuthority,
            },
        }
    }

    /// The player entity the call is about
    pub fn subject(&self) -> PlayerId {
        match self {
            Command::RequestDamage { target, .. } => *target,
            Command::RequestWeaponChange { player, .. } => *player,
        }
    }
}

/// Notifications fanned out by the state authority to every mirror
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rpc", rename_all = "snake_case")]
pub enum Broadcast {
    MatchStarted {
        start_tick: Tick,
        end_tick: Tick,
    },
    PlayerDied {
        victim: PlayerId,
        killer: Option<PlayerId>,
    },
    PlayerRespawned {
        player: PlayerId,
        pose: Pose,
    },
    WeaponTierChanged {
        player: PlayerId,
        tier: u8,
    },
    MatchEnded {
        reason: EndReason,
        winner: Option<PlayerId>,
        winner_kills: u32,
        winner_deaths: u32,
        winner_line: String,
    },
}

impl Broadcast {
    pub fn policy(&self) -> RpcPolicy {
        let name = match self {
            Broadcast::MatchStarted { .. } => "match_started",
            Broadcast::PlayerDied { .. } => "player_died",
            Broadcast::PlayerRespawned { .. } => "player_respawned",
            Broadcast::WeaponTierChanged { .. } => "weapon_tier_changed",
            Broadcast::MatchEnded { .. } => "match_ended",
        };
        RpcPolicy {
            name,
            sources: Sources::StateAuthority,
            targets: Targets::All,
        }
    }
}

/// A command in flight, stamped with its sender and per-sender sequence
#[derive(Debug, Clone)]
pub struct RpcEnvelope {
    pub sender: Role,
    pub seq: u64,
    pub command: Command,
}

/// Sending half of the channel toward one session's state authority.
///
/// Each participant holds its own sender so sequence numbers are per
/// sender; calls never block.
#[derive(Debug)]
pub struct RpcSender {
    match_id: Uuid,
    tx: mpsc::UnboundedSender<RpcEnvelope>,
    next_seq: AtomicU64,
}

impl RpcSender {
    pub fn new(match_id: Uuid, tx: mpsc::UnboundedSender<RpcEnvelope>) -> Self {
        Self {
            match_id,
            tx,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Issue a command as `who`; rejected calls never reach the session
    pub fn send<A: Authority>(&self, who: &A, command: Command) -> Result<(), SyncError> {
        if who.match_id() != self.match_id {
            return Err(SyncError::ForeignSession);
        }

        let policy = command.policy();
        let caller = who.role();
        if !policy.admits(caller, command.subject()) {
            return Err(SyncError::RpcRejected {
                caller,
                rpc: policy.name,
            });
        }

        let envelope = RpcEnvelope {
            sender: caller,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            command,
        };

        self.tx
            .send(envelope)
            .map_err(|_| SyncError::StaleCommand("match is closed"))
    }
}

/// Receiving-side bookkeeping: drops redelivered calls.
///
/// Delivery is at-least-once and ordered per sender, so anything at or
/// below the last sequence seen from a sender is a replay.
#[derive(Debug, Default)]
pub struct RpcInbox {
    last_seq: HashMap<Role, u64>,
}

impl RpcInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for a replayed envelope
    pub fn accept(&mut self, envelope: &RpcEnvelope) -> bool {
        let last = self.last_seq.entry(envelope.sender).or_insert(0);
        if envelope.seq <= *last {
            return false;
        }
        *last = envelope.seq;
        true
    }

    /// Forget a sender that left
    pub fn forget(&mut self, sender: Role) {
        self.last_seq.remove(&sender);
    }
}

/// Broadcasts produced during a tick, waiting to be fanned out
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Broadcast>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the state authority may broadcast
    pub fn push(&mut self, _auth: &StateAuthority, broadcast: Broadcast) {
        self.pending.push(broadcast);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Broadcast> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::authority::{InputAuthority, Observer};
    use tokio_test::{assert_err, assert_ok};

    fn channel() -> (Uuid, RpcSender, mpsc::UnboundedReceiver<RpcEnvelope>) {
        let match_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        (match_id, RpcSender::new(match_id, tx), rx)
    }

    #[test]
    fn test_damage_allowed_from_any_participant() {
        let (match_id, sender, mut rx) = channel();
        let shooter = InputAuthority::grant(match_id, PlayerId(2));
        assert_ok!(sender.send(
            &shooter,
            Command::RequestDamage {
                target: PlayerId(1),
                amount: 10.0,
                attacker: PlayerId(2),
            }
        ));
        let host = StateAuthority::grant(match_id);
        assert_ok!(sender.send(
            &host,
            Command::RequestDamage {
                target: PlayerId(1),
                amount: 10.0,
                attacker: PlayerId(2),
            }
        ));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.sender, Role::InputAuthority(PlayerId(2)));
        assert_eq!(first.seq, 1);
        assert_eq!(rx.try_recv().unwrap().seq, 2);
    }

    #[test]
    fn test_weapon_change_only_from_own_input_authority() {
        let (match_id, sender, mut rx) = channel();
        let other = InputAuthority::grant(match_id, PlayerId(2));
        let err = sender
            .send(
                &other,
                Command::RequestWeaponChange {
                    player: PlayerId(1),
                    tier: 2,
                },
            )
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::RpcRejected {
                caller: Role::InputAuthority(PlayerId(2)),
                rpc: "request_weapon_change"
            }
        );
        // rejected locally, nothing queued
        assert!(rx.try_recv().is_err());

        let host = StateAuthority::grant(match_id);
        assert_err!(sender.send(
            &host,
            Command::RequestWeaponChange {
                player: PlayerId(1),
                tier: 2
            }
        ));

        let owner = InputAuthority::grant(match_id, PlayerId(1));
        assert_ok!(sender.send(
            &owner,
            Command::RequestWeaponChange {
                player: PlayerId(1),
                tier: 2
            }
        ));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_observer_cannot_send() {
        let (match_id, sender, _rx) = channel();
        let observer = Observer::new(match_id);
        assert_err!(sender.send(
            &observer,
            Command::RequestDamage {
                target: PlayerId(1),
                amount: 1.0,
                attacker: PlayerId(1),
            }
        ));
    }

    #[test]
    fn test_closed_session_is_stale() {
        let (match_id, sender, rx) = channel();
        drop(rx);
        let shooter = InputAuthority::grant(match_id, PlayerId(2));
        let err = sender
            .send(
                &shooter,
                Command::RequestDamage {
                    target: PlayerId(1),
                    amount: 1.0,
                    attacker: PlayerId(2),
                },
            )
            .unwrap_err();
        assert_eq!(err, SyncError::StaleCommand("match is closed"));
    }

    #[test]
    fn test_inbox_drops_replays_per_sender() {
        let mut inbox = RpcInbox::new();
        let envelope = |sender, seq| RpcEnvelope {
            sender,
            seq,
            command: Command::RequestWeaponChange {
                player: PlayerId(1),
                tier: 0,
            },
        };
        let a = Role::InputAuthority(PlayerId(1));
        let b = Role::InputAuthority(PlayerId(2));

        assert!(inbox.accept(&envelope(a, 1)));
        assert!(inbox.accept(&envelope(b, 1)));
        assert!(!inbox.accept(&envelope(a, 1)));
        assert!(inbox.accept(&envelope(a, 2)));

        inbox.forget(a);
        assert!(inbox.accept(&envelope(a, 1)));
    }

    #[test]
    fn test_broadcast_policy() {
        let policy = Broadcast::PlayerDied {
            victim: PlayerId(1),
            killer: None,
        }
        .policy();
        assert_eq!(policy.name, "player_died");
        assert_eq!(policy.targets, Targets::All);
        assert!(policy.admits(Role::StateAuthority, PlayerId(1)));
        assert!(!policy.admits(Role::InputAuthority(PlayerId(1)), PlayerId(1)));
    }

    #[tokio::test]
    async fn test_calls_from_one_sender_arrive_in_order() {
        let (match_id, sender, mut rx) = channel();
        let shooter = InputAuthority::grant(match_id, PlayerId(3));
        for amount in [5.0, 6.0, 7.0] {
            sender
                .send(
                    &shooter,
                    Command::RequestDamage {
                        target: PlayerId(1),
                        amount,
                        attacker: PlayerId(3),
                    },
                )
                .unwrap();
        }

        let mut amounts = Vec::new();
        for _ in 0..3 {
            if let Some(RpcEnvelope {
                command: Command::RequestDamage { amount, .. },
                ..
            }) = rx.recv().await
            {
                amounts.push(amount);
            }
        }
        assert_eq!(amounts, vec![5.0, 6.0, 7.0]);
    }
}
