//! Time-ordered queue of pending respawns.
//!
//! The scheduler only decides; the map applies the returned
//! [`RespawnAction`]s. Entries are re-validated through a [`RespawnGate`]
//! when they come due, since group, pool and instance state may have changed
//! since scheduling.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use worldgrid_common::{GridCoord, SpawnKey, SpawnType, UnixTime};

/// Reschedule horizon for spawns linked to themselves.
pub const WEEK_SECS: u64 = 7 * 24 * 60 * 60;

/// Bounds of the random delay added after an unresolved linked respawn.
pub const LINKED_JITTER_MIN_SECS: u64 = 5;
pub const LINKED_JITTER_MAX_SECS: u64 = 15;

/// A pending respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespawnInfo {
    pub key: SpawnKey,
    /// Template entry, kept for diagnostics and persistence.
    pub entry: u32,
    pub due: UnixTime,
    /// Grid owning the spawn point.
    pub grid: GridCoord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Inserted,
    /// An entry due later was replaced.
    Replaced { previous: UnixTime },
    /// An entry due sooner already exists and was kept.
    Rejected { existing: UnixTime },
}

impl ScheduleOutcome {
    pub fn is_stored(self) -> bool {
        !matches!(self, ScheduleOutcome::Rejected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingTemplate,
    GroupInactive,
    BlockingInstance,
}

/// Outcome for one due entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnAction {
    Dropped { info: RespawnInfo, reason: DropReason },
    /// Handed to the pool manager.
    Delegated { info: RespawnInfo, pool: u32 },
    /// Put back with a later due time.
    Rescheduled { info: RespawnInfo },
    /// Create the entity now.
    Materialize { info: RespawnInfo },
    /// Removed from the queue; the grid spawns it when it loads.
    Released { info: RespawnInfo },
}

impl RespawnAction {
    pub fn info(&self) -> &RespawnInfo {
        match self {
            RespawnAction::Dropped { info, .. }
            | RespawnAction::Delegated { info, .. }
            | RespawnAction::Rescheduled { info }
            | RespawnAction::Materialize { info }
            | RespawnAction::Released { info } => info,
        }
    }
}

/// Map state consulted when an entry comes due.
pub trait RespawnGate {
    fn has_template(&self, key: SpawnKey) -> bool;

    fn is_group_active(&self, key: SpawnKey) -> bool;

    fn pool_of(&self, key: SpawnKey) -> Option<u32>;

    /// A live instance that prevents a second copy.
    fn has_blocking_instance(&self, key: SpawnKey) -> bool;

    fn linked_spawn(&self, key: SpawnKey) -> Option<SpawnKey>;

    fn is_grid_loaded(&self, grid: GridCoord) -> bool;
}

type QueueKey = (UnixTime, u64, SpawnType);

fn queue_key(info: &RespawnInfo) -> QueueKey {
    (info.due, info.key.spawn_id, info.key.kind)
}

/// At most one entry per spawn key, ordered by (due, spawn id, type).
#[derive(Debug, Clone, Default)]
pub struct RespawnScheduler {
    queue: BTreeSet<QueueKey>,
    entries: HashMap<SpawnKey, RespawnInfo>,
    seed: u64,
}

impl RespawnScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler whose linked-respawn jitter is derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: SpawnKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get(&self, key: SpawnKey) -> Option<&RespawnInfo> {
        self.entries.get(&key)
    }

    pub fn due_time(&self, key: SpawnKey) -> Option<UnixTime> {
        self.entries.get(&key).map(|info| info.due)
    }

    pub fn next_due(&self) -> Option<UnixTime> {
        self.queue.first().map(|&(due, _, _)| due)
    }

    /// Entries in due order.
    pub fn iter(&self) -> impl Iterator<Item = &RespawnInfo> + '_ {
        self.queue.iter().filter_map(|&(_, spawn_id, kind)| {
            self.entries.get(&SpawnKey { kind, spawn_id })
        })
    }

    /// Queue `info`. An earlier or equal due time replaces an existing
    /// entry; a later one is rejected.
    pub fn schedule(&mut self, info: RespawnInfo) -> ScheduleOutcome {
        let outcome = match self.entries.get(&info.key) {
            Some(existing) if existing.due < info.due => {
                return ScheduleOutcome::Rejected {
                    existing: existing.due,
                };
            }
            Some(existing) => ScheduleOutcome::Replaced {
                previous: existing.due,
            },
            None => ScheduleOutcome::Inserted,
        };
        self.unlink(info.key);
        self.link(info);
        outcome
    }

    pub fn cancel(&mut self, key: SpawnKey) -> Option<RespawnInfo> {
        self.unlink(key)
    }

    fn link(&mut self, info: RespawnInfo) {
        let inserted = self.queue.insert(queue_key(&info));
        debug_assert!(inserted, "respawn {} queued twice", info.key);
        self.entries.insert(info.key, info);
    }

    fn unlink(&mut self, key: SpawnKey) -> Option<RespawnInfo> {
        let info = self.entries.remove(&key)?;
        self.queue.remove(&queue_key(&info));
        Some(info)
    }

    fn jitter(&mut self) -> u64 {
        self.seed = splitmix64(self.seed);
        LINKED_JITTER_MIN_SECS + self.seed % (LINKED_JITTER_MAX_SECS - LINKED_JITTER_MIN_SECS + 1)
    }

    /// Pop every entry due at or before `now` and decide what to do with it.
    pub fn drain_due(&mut self, now: UnixTime, gate: &impl RespawnGate) -> Vec<RespawnAction> {
        let mut actions = Vec::new();
        let mut saturated = Vec::new();
        while let Some(&(due, spawn_id, kind)) = self.queue.first() {
            if due > now {
                break;
            }
            self.queue.pop_first();
            let key = SpawnKey { kind, spawn_id };
            let Some(info) = self.entries.remove(&key) else {
                debug_assert!(false, "respawn queue entry {key} has no info");
                continue;
            };
            let action = self.check(info, now, gate);
            // Re-queued at once so later followers in this pass see the new time.
            if let RespawnAction::Rescheduled { info } = action {
                if info.due > now {
                    self.link(info);
                } else {
                    saturated.push(info);
                }
            }
            actions.push(action);
        }
        for info in saturated {
            self.link(info);
        }
        actions
    }

    fn check(&mut self, mut info: RespawnInfo, now: UnixTime, gate: &impl RespawnGate) -> RespawnAction {
        let key = info.key;
        if !gate.has_template(key) {
            return RespawnAction::Dropped {
                info,
                reason: DropReason::MissingTemplate,
            };
        }
        if !gate.is_group_active(key) {
            return RespawnAction::Dropped {
                info,
                reason: DropReason::GroupInactive,
            };
        }
        if let Some(pool) = gate.pool_of(key) {
            return RespawnAction::Delegated { info, pool };
        }
        if gate.has_blocking_instance(key) {
            return RespawnAction::Dropped {
                info,
                reason: DropReason::BlockingInstance,
            };
        }
        if let Some(linked) = gate.linked_spawn(key) {
            let rescheduled = if linked == key {
                Some(now.saturating_add(WEEK_SECS))
            } else {
                match self.due_time(linked) {
                    Some(UnixTime::MAX) => Some(UnixTime::MAX),
                    Some(linked_due) => Some(now.max(linked_due).saturating_add(self.jitter())),
                    None => None,
                }
            };
            if let Some(due) = rescheduled {
                info.due = due;
                return RespawnAction::Rescheduled { info };
            }
        }
        if gate.is_grid_loaded(info.grid) {
            RespawnAction::Materialize { info }
        } else {
            RespawnAction::Released { info }
        }
    }
}

fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
