//! A minimal in-memory [`EntityStore`] demonstration. Real deployments plug in the
//! game's own scene graph (prefab catalog, physics removal, interest management); this
//! one only tracks what [`netcode::server::ServerCore`] needs to exercise spawn/unspawn
//! and observer fan-out end to end.

use hashbrown::HashMap;
use netcode::entity::{EntityId, EntityStore, NetworkEntity};

pub struct InMemoryEntityStore {
    components: HashMap<EntityId, NetworkEntity>,
    observers: HashMap<EntityId, Vec<u64>>,
}

impl InMemoryEntityStore {
    pub fn new() -> InMemoryEntityStore {
        InMemoryEntityStore { components: HashMap::new(), observers: HashMap::new() }
    }

    /// Registers `connection` as an observer of `entity`, so it receives `Unspawn`
    /// notifications when the entity goes away.
    pub fn add_observer(&mut self, entity: EntityId, connection: u64) {
        self.observers.entry(entity).or_insert_with(Vec::new).push(connection);
    }
}

impl EntityStore for InMemoryEntityStore {
    fn has_network_entity(&self, entity: EntityId) -> bool {
        self.components.contains_key(&entity)
    }

    fn get_network_entity(&self, entity: EntityId) -> Option<&NetworkEntity> {
        self.components.get(&entity)
    }

    fn set_network_entity(&mut self, entity: EntityId, component: NetworkEntity) {
        self.components.insert(entity, component);
    }

    fn unique_id(&self, entity: EntityId) -> u64 {
        entity
    }

    fn destroy(&mut self, entity: EntityId) {
        self.components.remove(&entity);
        self.observers.remove(&entity);
    }

    fn observers(&self, entity: EntityId) -> &[u64] {
        self.observers.get(&entity).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_start_empty_and_clear_on_destroy() {
        let mut store = InMemoryEntityStore::new();
        store.add_observer(5, 1);
        store.add_observer(5, 2);
        assert_eq!(store.observers(5), &[1, 2]);

        store.destroy(5);
        assert!(store.observers(5).is_empty());
    }
}
