//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::clock::Tick;
use crate::game::replication::PropertyUpdate;
use crate::game::rpc::Broadcast;
use crate::game::{InputIntent, PlayerId, Pose, Vec3};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Input intent for the current tick
    Input {
        /// Sequence number, stale or repeated inputs are dropped
        seq: u32,
        intent: InputIntent,
        /// Pose from the client's local movement integrator
        #[serde(default)]
        pose: Option<Pose>,
        #[serde(default)]
        velocity: Option<Vec3>,
    },

    /// Report a hit detected locally
    RequestDamage {
        target: PlayerId,
        amount: f32,
        attacker: PlayerId,
    },

    /// Request a weapon tier for the sender's own player
    RequestWeaponChange { tier: u8 },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    LeaveMatch,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// Confirmation of match join with the full replicated state
    MatchJoined {
        match_id: Uuid,
        player_id: PlayerId,
        tick: Tick,
        tick_rate: u32,
        state: Vec<PropertyUpdate>,
    },

    /// Player joined the match
    PlayerJoined { player_id: PlayerId, nickname: String },

    /// Player left the match
    PlayerLeft { player_id: PlayerId, reason: String },

    /// Replicated property changes since the previous sync
    Sync {
        tick: Tick,
        updates: Vec<PropertyUpdate>,
    },

    /// Broadcast call from the state authority
    Rpc { tick: Tick, call: Broadcast },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_damage_json() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"request_damage","target":3,"amount":34.0,"attacker":7}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::RequestDamage {
                target,
                amount,
                attacker,
            } => {
                assert_eq!(target, PlayerId(3));
                assert_eq!(amount, 34.0);
                assert_eq!(attacker, PlayerId(7));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_input_pose_is_optional() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"input","seq":4,"intent":{"move_x":0.5,"move_y":1.0,"jump":false,"run":true,"crouch":false,"aim_yaw_delta":0.1}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMsg::Input { seq: 4, pose: None, .. }));
    }

    #[test]
    fn test_match_ended_json_shape() {
        let msg = ServerMsg::Rpc {
            tick: Tick(900),
            call: Broadcast::MatchEnded {
                reason: crate::game::r#match::EndReason::TimeExpired,
                winner: Some(PlayerId(1)),
                winner_kills: 3,
                winner_deaths: 1,
                winner_line: "Winner: A (3 / 1)".into(),
            },
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "rpc");
        assert_eq!(json["tick"], 900);
        assert_eq!(json["call"]["rpc"], "match_ended");
        assert_eq!(json["call"]["reason"], "time_expired");
        assert_eq!(json["call"]["winner"], 1);
    }
}
