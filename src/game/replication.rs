//! Replicated property store
//!
//! One typed slot per (player, field). Every field declares its writer
//! statically (`Field::writer`), which replaces locking: no slot ever has
//! two logical owners. Writes are tracked so the session can ship only
//! the slots that changed since the last sync, and so callers can ask who
//! changed a value during the current tick.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::authority::{Authority, Role, StateAuthority};
use super::clock::Tick;
use super::error::SyncError;
use super::{InputIntent, PlayerId, Pose};

/// Replicated fields of a player entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Nickname,
    MaxHp,
    Hp,
    IsDead,
    KillCount,
    DeathCount,
    RespawnDeadline,
    WeaponTier,
    /// Validated pose, re-broadcast by the host
    Pose,
    /// Pose reported by the controlling client (advisory)
    ReportedPose,
    /// Latest input intent from the controlling client
    Intent,
}

/// Declared writer of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writer {
    State,
    Input,
    /// Fixed at spawn, never written afterwards
    Nobody,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Nickname => "nickname",
            Field::MaxHp => "max_hp",
            Field::Hp => "hp",
            Field::IsDead => "is_dead",
            Field::KillCount => "kill_count",
            Field::DeathCount => "death_count",
            Field::RespawnDeadline => "respawn_deadline",
            Field::WeaponTier => "weapon_tier",
            Field::Pose => "pose",
            Field::ReportedPose => "reported_pose",
            Field::Intent => "intent",
        }
    }

    pub fn writer(self) -> Writer {
        match self {
            Field::Nickname | Field::MaxHp => Writer::Nobody,
            Field::ReportedPose | Field::Intent => Writer::Input,
            _ => Writer::State,
        }
    }

    fn kind(self) -> ValueKind {
        match self {
            Field::Nickname => ValueKind::Text,
            Field::MaxHp | Field::Hp => ValueKind::Float,
            Field::IsDead => ValueKind::Bool,
            Field::KillCount | Field::DeathCount => ValueKind::Count,
            Field::RespawnDeadline => ValueKind::Deadline,
            Field::WeaponTier => ValueKind::Tier,
            Field::Pose | Field::ReportedPose => ValueKind::Pose,
            Field::Intent => ValueKind::Intent,
        }
    }

    /// Whether `role` may write this field on `entity`
    pub fn permits(self, role: Role, entity: PlayerId) -> bool {
        match (self.writer(), role) {
            (Writer::State, Role::StateAuthority) => true,
            (Writer::Input, Role::InputAuthority(owner)) => owner == entity,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Float,
    Bool,
    Count,
    Deadline,
    Tier,
    Pose,
    Intent,
}

impl ValueKind {
    fn name(self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Count => "count",
            ValueKind::Deadline => "deadline",
            ValueKind::Tier => "tier",
            ValueKind::Pose => "pose",
            ValueKind::Intent => "intent",
        }
    }
}

/// Value held in a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Float(f32),
    Bool(bool),
    Count(u32),
    Deadline(Option<Tick>),
    Tier(u8),
    Pose(Pose),
    Intent(InputIntent),
}

impl PropertyValue {
    fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Text(_) => ValueKind::Text,
            PropertyValue::Float(_) => ValueKind::Float,
            PropertyValue::Bool(_) => ValueKind::Bool,
            PropertyValue::Count(_) => ValueKind::Count,
            PropertyValue::Deadline(_) => ValueKind::Deadline,
            PropertyValue::Tier(_) => ValueKind::Tier,
            PropertyValue::Pose(_) => ValueKind::Pose,
            PropertyValue::Intent(_) => ValueKind::Intent,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u32> {
        match self {
            PropertyValue::Count(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_tier(&self) -> Option<u8> {
        match self {
            PropertyValue::Tier(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_pose(&self) -> Option<Pose> {
        match self {
            PropertyValue::Pose(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_intent(&self) -> Option<InputIntent> {
        match self {
            PropertyValue::Intent(v) => Some(*v),
            _ => None,
        }
    }
}

/// One replication operation shipped to mirrors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PropertyUpdate {
    Set {
        entity: PlayerId,
        field: Field,
        value: PropertyValue,
    },
    Despawn {
        entity: PlayerId,
    },
}

#[derive(Debug, Clone)]
struct Slot {
    value: PropertyValue,
    changed_at: Tick,
    changed_by: Role,
}

/// Authoritative store for one session
#[derive(Debug)]
pub struct PropertyStore {
    match_id: Uuid,
    slots: BTreeMap<(PlayerId, Field), Slot>,
    dirty: BTreeSet<(PlayerId, Field)>,
    despawned: Vec<PlayerId>,
}

impl PropertyStore {
    pub fn new(match_id: Uuid) -> Self {
        Self {
            match_id,
            slots: BTreeMap::new(),
            dirty: BTreeSet::new(),
            despawned: Vec::new(),
        }
    }

    /// Create every slot of a new entity
    pub fn spawn_entity(
        &mut self,
        auth: &StateAuthority,
        entity: PlayerId,
        initial: impl IntoIterator<Item = (Field, PropertyValue)>,
        now: Tick,
    ) -> Result<(), SyncError> {
        self.check_session(auth)?;

        for (field, value) in initial {
            check_kind(field, &value)?;
            self.slots.insert(
                (entity, field),
                Slot {
                    value,
                    changed_at: now,
                    changed_by: Role::StateAuthority,
                },
            );
            self.dirty.insert((entity, field));
        }
        self.despawned.retain(|e| *e != entity);
        Ok(())
    }

    /// Drop every slot of an entity
    pub fn despawn_entity(&mut self, auth: &StateAuthority, entity: PlayerId) -> Result<(), SyncError> {
        self.check_session(auth)?;
        let before = self.slots.len();
        self.slots.retain(|(e, _), _| *e != entity);
        self.dirty.retain(|(e, _)| *e != entity);
        if self.slots.len() == before {
            return Err(SyncError::UnresolvedReference(entity));
        }
        self.despawned.push(entity);
        Ok(())
    }

    pub fn contains(&self, entity: PlayerId) -> bool {
        self.slots
            .range((entity, Field::Nickname)..=(entity, Field::Intent))
            .next()
            .is_some()
    }

    /// Read a slot (always permitted)
    pub fn read(&self, entity: PlayerId, field: Field) -> Option<&PropertyValue> {
        self.slots.get(&(entity, field)).map(|s| &s.value)
    }

    /// Write a slot as `who`.
    ///
    /// Returns whether the value changed.
    pub fn write<A: Authority>(
        &mut self,
        who: &A,
        entity: PlayerId,
        field: Field,
        value: PropertyValue,
        now: Tick,
    ) -> Result<bool, SyncError> {
        self.check_session(who)?;

        let role = who.role();
        if !field.permits(role, entity) {
            return Err(SyncError::AuthorityViolation {
                caller: role,
                entity,
                field: field.name(),
            });
        }
        check_kind(field, &value)?;

        let slot = self
            .slots
            .get_mut(&(entity, field))
            .ok_or(SyncError::UnresolvedReference(entity))?;

        if slot.value == value {
            return Ok(false);
        }

        slot.value = value;
        slot.changed_at = now;
        slot.changed_by = role;
        self.dirty.insert((entity, field));
        Ok(true)
    }

    /// Who changed this slot during `now`, if anyone
    pub fn changed_by(&self, entity: PlayerId, field: Field, now: Tick) -> Option<Role> {
        self.slots
            .get(&(entity, field))
            .filter(|s| s.changed_at == now)
            .map(|s| s.changed_by)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.despawned.is_empty()
    }

    /// Take every change since the previous drain
    pub fn drain_changes(&mut self) -> Vec<PropertyUpdate> {
        let mut updates: Vec<PropertyUpdate> = self
            .despawned
            .drain(..)
            .map(|entity| PropertyUpdate::Despawn { entity })
            .collect();

        for key in std::mem::take(&mut self.dirty) {
            if let Some(slot) = self.slots.get(&key) {
                updates.push(PropertyUpdate::Set {
                    entity: key.0,
                    field: key.1,
                    value: slot.value.clone(),
                });
            }
        }

        updates
    }

    /// Full state for a mirror that just joined
    pub fn full_state(&self) -> Vec<PropertyUpdate> {
        self.slots
            .iter()
            .map(|(&(entity, field), slot)| PropertyUpdate::Set {
                entity,
                field,
                value: slot.value.clone(),
            })
            .collect()
    }

    fn check_session<A: Authority>(&self, who: &A) -> Result<(), SyncError> {
        if who.match_id() != self.match_id {
            return Err(SyncError::ForeignSession);
        }
        Ok(())
    }
}

fn check_kind(field: Field, value: &PropertyValue) -> Result<(), SyncError> {
    let expected = field.kind();
    if value.kind() != expected {
        return Err(SyncError::TypeMismatch {
            field: field.name(),
            expected: expected.name(),
        });
    }
    Ok(())
}

/// Read-only copy kept by every participant
#[derive(Debug, Default, Clone)]
pub struct PropertyMirror {
    slots: BTreeMap<(PlayerId, Field), PropertyValue>,
}

impl PropertyMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, updates: &[PropertyUpdate]) {
        for update in updates {
            match update {
                PropertyUpdate::Set {
                    entity,
                    field,
                    value,
                } => {
                    self.slots.insert((*entity, *field), value.clone());
                }
                PropertyUpdate::Despawn { entity } => {
                    self.slots.retain(|(e, _), _| e != entity);
                }
            }
        }
    }

    pub fn read(&self, entity: PlayerId, field: Field) -> Option<&PropertyValue> {
        self.slots.get(&(entity, field))
    }

    /// Whether this mirror holds exactly the store's values
    pub fn matches(&self, store: &PropertyStore) -> bool {
        self.slots.len() == store.slots.len()
            && store
                .slots
                .iter()
                .all(|(key, slot)| self.slots.get(key) == Some(&slot.value))
    }
}
