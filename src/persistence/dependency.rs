use super::entity::EntityKind;

/// Static flush ordering over entity kinds.
///
/// Deletes run children before parents, inserts in the exact reverse, so a
/// single flush never violates referential integrity. The table is enumerated
/// explicitly and built once at engine bootstrap; it is never inferred from
/// the entity graph at flush time.
#[derive(Debug, Clone)]
pub struct EntityDependencyOrder {
    delete_order: Vec<EntityKind>,
    insert_order: Vec<EntityKind>,
}

impl EntityDependencyOrder {
    /// The engine's canonical ordering. Every kind that participates in a
    /// foreign-key relationship appears here; `ScopeInstance` is the parent
    /// of everything else and therefore deleted last, inserted first.
    pub fn bootstrap() -> Self {
        let delete_order = vec![
            EntityKind::Variable,
            EntityKind::EventSubscription,
            EntityKind::Job,
            EntityKind::DeadJob,
            EntityKind::ScopeInstance,
        ];
        debug_assert_eq!(delete_order.len(), EntityKind::ALL.len());
        debug_assert!(EntityKind::ALL.iter().all(|k| delete_order.contains(k)));

        let insert_order = delete_order.iter().rev().copied().collect();
        Self {
            delete_order,
            insert_order,
        }
    }

    pub fn delete_order(&self) -> &[EntityKind] {
        &self.delete_order
    }

    pub fn insert_order(&self) -> &[EntityKind] {
        &self.insert_order
    }
}
