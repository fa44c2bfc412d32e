//! Cross-cell moves discovered while cells are being iterated.
//!
//! Moving an entity between cells mid-iteration would invalidate the
//! iteration, so such moves are recorded here and applied in a separate pass
//! at the end of the tick.

use std::collections::HashMap;

use worldgrid_common::{EntityId, EntityKind, Placement};

/// Kinds that go through the queue, in drain order.
pub const RELOCATABLE_KINDS: [EntityKind; 4] = [
    EntityKind::Creature,
    EntityKind::GameObject,
    EntityKind::DynamicObject,
    EntityKind::AreaTrigger,
];

fn slot(kind: EntityKind) -> Option<usize> {
    RELOCATABLE_KINDS.iter().position(|k| *k == kind)
}

/// Per-entity queue marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    NotQueued,
    /// Queued with a live target.
    Active,
    /// Still listed but overtaken by an in-place move.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMove {
    pub id: EntityId,
    pub target: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Already listed; only the target changed.
    Updated,
    /// Requests are ignored while the queue drains.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct RelocationQueue {
    lists: [Vec<EntityId>; RELOCATABLE_KINDS.len()],
    markers: HashMap<EntityId, (MoveState, Placement)>,
    draining: bool,
}

impl RelocationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supports(kind: EntityKind) -> bool {
        slot(kind).is_some()
    }

    pub fn state(&self, id: EntityId) -> MoveState {
        self.markers.get(&id).map_or(MoveState::NotQueued, |(state, _)| *state)
    }

    /// Target of an active request.
    pub fn target(&self, id: EntityId) -> Option<Placement> {
        match self.markers.get(&id) {
            Some((MoveState::Active, target)) => Some(*target),
            _ => None,
        }
    }

    /// Number of active requests.
    pub fn len(&self) -> usize {
        self.markers
            .values()
            .filter(|(state, _)| *state == MoveState::Active)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Record a move of `id` to `target`. Unsupported kinds are ignored.
    pub fn request(&mut self, id: EntityId, target: Placement) -> Enqueue {
        if self.draining {
            return Enqueue::Ignored;
        }
        let Some(slot) = slot(id.kind()) else {
            return Enqueue::Ignored;
        };
        match self.markers.insert(id, (MoveState::Active, target)) {
            Some(_) => Enqueue::Updated,
            None => {
                self.lists[slot].push(id);
                Enqueue::Queued
            }
        }
    }

    /// An in-place move overtook the queued one.
    pub fn supersede(&mut self, id: EntityId) {
        if self.draining {
            return;
        }
        if let Some((state, _)) = self.markers.get_mut(&id) {
            if *state == MoveState::Active {
                *state = MoveState::Superseded;
            }
        }
    }

    /// Drop every trace of `id`, e.g. when it leaves the map.
    pub fn forget(&mut self, id: EntityId) {
        self.markers.remove(&id);
    }

    pub fn begin_drain(&mut self) {
        self.draining = true;
    }

    pub fn end_drain(&mut self) {
        self.draining = false;
    }

    /// Take the still-active requests of one kind, clearing their markers.
    pub fn take(&mut self, kind: EntityKind) -> Vec<PendingMove> {
        let Some(slot) = slot(kind) else {
            return Vec::new();
        };
        let listed = std::mem::take(&mut self.lists[slot]);
        listed
            .into_iter()
            .filter_map(|id| match self.markers.remove(&id) {
                Some((MoveState::Active, target)) => Some(PendingMove { id, target }),
                _ => None,
            })
            .collect()
    }
}
