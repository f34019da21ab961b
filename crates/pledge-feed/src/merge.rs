//! Ordered merge engine: the visible, newest-first list.
//!
//! Seeding sorts once. Later admissions are prepended and never re-sorted,
//! so a late-arriving older entity can sit above newer ones until the next
//! seed.

use std::collections::{HashSet, VecDeque};

use pledge_core::{Entity, EntityId};

/// The list a view renders.
#[derive(Debug, Clone, Default)]
pub struct VisibleList {
    items: VecDeque<Entity>,
}

impl VisibleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with `entities` sorted by creation time, newest first.
    ///
    /// The sort is stable: entities sharing a timestamp keep fetch order. An
    /// id repeated in `entities` keeps its first occurrence only.
    pub fn seed(&mut self, entities: Vec<Entity>) {
        let mut seen = HashSet::new();
        let mut entities: Vec<Entity> = entities
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        entities.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.items = entities.into();
    }

    /// Prepend an admitted entity.
    pub fn apply_add(&mut self, entity: Entity) {
        self.items.push_front(entity);
    }

    /// Patch an entity in place by id. Returns whether it was found.
    pub fn apply_update(&mut self, entity: Entity) -> bool {
        match self.items.iter_mut().find(|e| e.id == entity.id) {
            Some(slot) => {
                *slot = entity;
                true
            }
            None => false,
        }
    }

    /// Swap the entity at `old`'s position for `entity`, keeping its place.
    ///
    /// Used when a server echo supersedes an optimistic local entry.
    pub fn replace(&mut self, old: &EntityId, entity: Entity) -> bool {
        match self.items.iter_mut().find(|e| &e.id == old) {
            Some(slot) => {
                *slot = entity;
                true
            }
            None => false,
        }
    }

    /// Drop every entity with this id. Returns whether any was removed.
    pub fn apply_remove(&mut self, id: &EntityId) -> bool {
        let before = self.items.len();
        self.items.retain(|e| &e.id != id);
        self.items.len() != before
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.items.iter().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Entity> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pledge_core::EntityBody;

    fn at(id: &str, minutes_ago: i64) -> Entity {
        Entity {
            id: EntityId::parse(id),
            display_name: format!("donor {id}"),
            emoji: "💚".to_string(),
            body: EntityBody::Contribution { amount: 5.0 },
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
                - chrono::Duration::minutes(minutes_ago),
            message: None,
            is_from_known_contributor: false,
            is_approved: true,
        }
    }

    fn ids(list: &VisibleList) -> Vec<String> {
        list.iter().map(|e| e.id.to_string()).collect()
    }

    #[test]
    fn test_seed_sorts_newest_first() {
        let mut list = VisibleList::new();
        list.seed(vec![at("t3", 3), at("t1", 1), at("t2", 2)]);
        assert_eq!(ids(&list), ["t1", "t2", "t3"]);
    }

    #[test]
    fn test_seed_is_stable_for_equal_timestamps() {
        let mut list = VisibleList::new();
        list.seed(vec![at("a", 1), at("b", 1), at("c", 0)]);
        assert_eq!(ids(&list), ["c", "a", "b"]);
    }

    #[test]
    fn test_seed_replaces_previous_contents() {
        let mut list = VisibleList::new();
        list.seed(vec![at("old", 5)]);
        list.seed(vec![at("new", 1)]);
        assert_eq!(ids(&list), ["new"]);
    }

    #[test]
    fn test_seed_keeps_first_of_repeated_id() {
        let mut list = VisibleList::new();
        let mut stale = at("t1", 9);
        stale.display_name = "stale".to_string();
        list.seed(vec![at("t2", 2), at("t1", 1), stale]);
        assert_eq!(ids(&list), ["t1", "t2"]);
        assert_eq!(
            list.get(&EntityId::parse("t1")).unwrap().display_name,
            "donor t1"
        );
    }

    #[test]
    fn test_add_prepends_without_resorting() {
        let mut list = VisibleList::new();
        list.seed(vec![at("t1", 1), at("t2", 2), at("t3", 3)]);

        list.apply_add(at("t0", 0));
        assert_eq!(ids(&list), ["t0", "t1", "t2", "t3"]);

        list.apply_add(at("older", 10));
        assert_eq!(ids(&list), ["older", "t0", "t1", "t2", "t3"]);
    }

    #[test]
    fn test_update_patches_in_place() {
        let mut list = VisibleList::new();
        list.seed(vec![at("t1", 1), at("t2", 2)]);
        let mut patched = at("t2", 2);
        patched.display_name = "renamed".to_string();

        assert!(list.apply_update(patched));
        assert_eq!(ids(&list), ["t1", "t2"]);
        assert_eq!(
            list.get(&EntityId::parse("t2")).unwrap().display_name,
            "renamed"
        );
        assert!(!list.apply_update(at("missing", 0)));
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut list = VisibleList::new();
        list.seed(vec![at("t1", 1), at("local-1", 2), at("t3", 3)]);
        assert!(list.replace(&EntityId::parse("local-1"), at("srv-2", 2)));
        assert_eq!(ids(&list), ["t1", "srv-2", "t3"]);
    }

    #[test]
    fn test_remove_filters_by_id() {
        let mut list = VisibleList::new();
        list.seed(vec![at("t1", 1), at("t2", 2)]);
        assert!(list.apply_remove(&EntityId::parse("t1")));
        assert!(!list.apply_remove(&EntityId::parse("t1")));
        assert_eq!(ids(&list), ["t2"]);
        assert_eq!(list.len(), 1);
    }
}
