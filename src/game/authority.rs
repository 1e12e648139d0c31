//! Authority capabilities
//!
//! Mutating operations take a capability token instead of checking a
//! runtime flag. Tokens can only be minted inside `crate::game`: the
//! session task mints the single `StateAuthority` when it hosts a match,
//! and mints one `InputAuthority` per admitted player, which is handed to
//! that player's connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::PlayerId;

/// The role a caller acts in for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "player", rename_all = "snake_case")]
pub enum Role {
    /// The process whose writes are canonical
    StateAuthority,
    /// The controlling client of one player entity
    InputAuthority(PlayerId),
    /// Anyone else (mirrors, tooling)
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::StateAuthority => write!(f, "state-authority"),
            Role::InputAuthority(id) => write!(f, "input-authority({})", id),
            Role::Observer => write!(f, "observer"),
        }
    }
}

/// Something that can act on a session's replicated state
pub trait Authority {
    fn match_id(&self) -> Uuid;
    fn role(&self) -> Role;
}

/// Capability held by the host of one match
#[derive(Debug)]
pub struct StateAuthority {
    match_id: Uuid,
}

impl StateAuthority {
    pub(in crate::game) fn grant(match_id: Uuid) -> Self {
        Self { match_id }
    }
}

impl Authority for StateAuthority {
    fn match_id(&self) -> Uuid {
        self.match_id
    }

    fn role(&self) -> Role {
        Role::StateAuthority
    }
}

/// Capability held by the connection controlling one player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAuthority {
    match_id: Uuid,
    player_id: PlayerId,
}

impl InputAuthority {
    pub(in crate::game) fn grant(match_id: Uuid, player_id: PlayerId) -> Self {
        Self {
            match_id,
            player_id,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }
}

impl Authority for InputAuthority {
    fn match_id(&self) -> Uuid {
        self.match_id
    }

    fn role(&self) -> Role {
        Role::InputAuthority(self.player_id)
    }
}

/// Read-only participant with no write capability
#[derive(Debug, Clone)]
pub struct Observer {
    match_id: Uuid,
}

impl Observer {
    pub fn new(match_id: Uuid) -> Self {
        Self { match_id }
    }
}

impl Authority for Observer {
    fn match_id(&self) -> Uuid {
        self.match_id
    }

    fn role(&self) -> Role {
        Role::Observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        let id = Uuid::new_v4();
        assert_eq!(StateAuthority::grant(id).role(), Role::StateAuthority);
        assert_eq!(
            InputAuthority::grant(id, PlayerId(3)).role(),
            Role::InputAuthority(PlayerId(3))
        );
        assert_eq!(Observer::new(id).role(), Role::Observer);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::InputAuthority(PlayerId(7)).to_string(), "input-authority(7)");
        assert_eq!(Role::StateAuthority.to_string(), "state-authority");
    }
}
