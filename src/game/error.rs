//! Error taxonomy for the synchronization core
//!
//! Nothing here is fatal. The session task logs each error at the level
//! given by [`SyncError::severity`] and keeps ticking.

use super::authority::Role;
use super::PlayerId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// A write by a role that is not the declared writer of the slot
    #[error("{caller} may not write {field} of player {entity}")]
    AuthorityViolation {
        caller: Role,
        entity: PlayerId,
        field: &'static str,
    },

    /// An RPC issued by a role outside its allowed sources
    #[error("{caller} may not issue {rpc}")]
    RpcRejected { caller: Role, rpc: &'static str },

    /// A token minted for another session
    #[error("capability belongs to another session")]
    ForeignSession,

    /// A command against a terminal or inactive state (dead player, ended match)
    #[error("stale command: {0}")]
    StaleCommand(&'static str),

    /// A referenced entity is not (or no longer) part of the session
    #[error("unresolved reference to player {0}")]
    UnresolvedReference(PlayerId),

    /// An expected collaborator is absent, a fallback was used
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Input that failed validation (negative damage, NaN, unknown tier)
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A value of the wrong kind written to a typed slot
    #[error("type mismatch for {field}: expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    /// Session is at capacity
    #[error("match is full")]
    MatchFull,
}

/// How loudly an error should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Routine traffic under at-least-once delivery
    Routine,
    /// Worth an operator's attention
    Suspicious,
}

impl SyncError {
    pub fn severity(&self) -> Severity {
        match self {
            SyncError::StaleCommand(_) | SyncError::UnresolvedReference(_) => Severity::Routine,
            _ => Severity::Suspicious,
        }
    }

    /// Stable code sent to clients in `ServerMsg::Error`
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::AuthorityViolation { .. } => "authority_violation",
            SyncError::RpcRejected { .. } => "rpc_rejected",
            SyncError::ForeignSession => "foreign_session",
            SyncError::StaleCommand(_) => "stale_command",
            SyncError::UnresolvedReference(_) => "unresolved_reference",
            SyncError::MissingCollaborator(_) => "missing_collaborator",
            SyncError::Malformed(_) => "malformed",
            SyncError::TypeMismatch { .. } => "type_mismatch",
            SyncError::MatchFull => "match_full",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_errors() {
        assert_eq!(
            SyncError::StaleCommand("damage on dead player").severity(),
            Severity::Routine
        );
        assert_eq!(
            SyncError::UnresolvedReference(PlayerId(4)).severity(),
            Severity::Routine
        );
        assert_eq!(
            SyncError::RpcRejected {
                caller: Role::Observer,
                rpc: "request_damage"
            }
            .severity(),
            Severity::Suspicious
        );
    }

    #[test]
    fn test_error_messages() {
        let err = SyncError::AuthorityViolation {
            caller: Role::InputAuthority(PlayerId(2)),
            entity: PlayerId(1),
            field: "hp",
        };
        assert_eq!(err.to_string(), "input-authority(2) may not write hp of player 1");
        assert_eq!(err.code(), "authority_violation");
    }
}
