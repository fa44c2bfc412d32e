use std::sync::{Mutex, PoisonError};

use crate::types::{EntityId, EntityKind};

/// Process-wide entity id source, shared by every map instance.
///
/// Counters are kept per kind and guarded by a mutex; map instances updated
/// on different workers draw from the same generator.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counters: Mutex<[u64; EntityKind::ALL.len()]>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `kind`. Counters start at 1.
    pub fn next(&self, kind: EntityKind) -> EntityId {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut counters[kind as usize];
        *slot += 1;
        EntityId::new(kind, *slot)
    }

    /// Highest counter handed out so far for `kind`.
    pub fn peek(&self, kind: EntityKind) -> u64 {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)[kind as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_are_sequential_per_kind() {
        let ids = IdGenerator::new();
        let a = ids.next(EntityKind::Creature);
        let b = ids.next(EntityKind::Creature);
        let c = ids.next(EntityKind::Player);
        assert_eq!(a.counter(), 1);
        assert_eq!(b.counter(), 2);
        assert_eq!(c.counter(), 1);
        assert_ne!(a, c);
        assert_eq!(ids.peek(EntityKind::Creature), 2);
    }

    #[test]
    fn shared_generator_never_repeats() {
        let ids = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| ids.next(EntityKind::GameObject))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all: Vec<EntityId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
