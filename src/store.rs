//! The revision-stamped entity store.
//!
//! Every observable mutation bumps `latest_revno` and restamps the touched
//! entry, so the entries with `revno > R` are exactly the changes an
//! observer at revno `R` has not seen. Removed entries stay behind as
//! tombstones while `ref_count > 0`: each count is one observer that was
//! told the entity exists and still has to be told it is gone.
//!
//! The store is owned by the coordinator thread and is not internally
//! synchronized.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::entity::{EntityId, EntityInfo};
use crate::envelope::Delta;

/// Store-local revision counter. Monotonic, never reused, never reset.
pub type Revno = u64;

struct EntityEntry {
    info: EntityInfo,
    /// Revno of the last change to this entry, including removal.
    revno: Revno,
    /// Revno at which the entity first appeared. Immutable.
    creation_revno: Revno,
    removed: bool,
    /// Observers that know of this entity and have not been told it is gone.
    ref_count: usize,
}

#[derive(Default)]
pub struct Store {
    latest_revno: Revno,
    entities: HashMap<EntityId, EntityEntry>,
    /// Revno-ordered index over `entities`. Revnos are unique, so moving an
    /// entry to the front is delete-old-key plus insert-new-key, and the
    /// descending range is the recency walk.
    order: BTreeMap<Revno, EntityId>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn latest_revno(&self) -> Revno {
        self.latest_revno
    }

    /// Upsert the entity carried by `info`.
    ///
    /// A payload structurally equal to the stored one is a no-op: a coarse
    /// change feed that re-announces unchanged entities must not produce
    /// spurious deltas or perturb the refcount accounting.
    pub fn update(&mut self, info: EntityInfo) {
        let id = info.entity_id();
        match self.entities.get_mut(&id) {
            None => self.add(id, info),
            Some(entry) => {
                if entry.info == info {
                    return;
                }
                self.latest_revno += 1;
                self.order.remove(&entry.revno);
                entry.revno = self.latest_revno;
                entry.info = info;
                entry.removed = false;
                self.order.insert(entry.revno, id);
            }
        }
    }

    /// Record that the entity with `id` is gone from the backing.
    ///
    /// An entity no observer has seen is dropped outright; otherwise it
    /// becomes a tombstone that lingers until every such observer has been
    /// served its removal delta or departed.
    pub fn remove(&mut self, id: &EntityId) {
        let Some(entry) = self.entities.get_mut(id) else {
            return;
        };
        if entry.removed {
            return;
        }
        self.latest_revno += 1;
        if entry.ref_count == 0 {
            let revno = entry.revno;
            self.entities.remove(id);
            self.order.remove(&revno);
            return;
        }
        self.order.remove(&entry.revno);
        entry.revno = self.latest_revno;
        entry.removed = true;
        self.order.insert(entry.revno, id.clone());
    }

    /// Current payload of a live entity. Tombstones report as absent.
    pub fn get(&self, id: &EntityId) -> Option<&EntityInfo> {
        self.entities
            .get(id)
            .filter(|entry| !entry.removed)
            .map(|entry| &entry.info)
    }

    /// Like [`Store::get`] but also reports tombstoned payloads.
    pub fn get_including_removed(&self, id: &EntityId) -> Option<&EntityInfo> {
        self.entities.get(id).map(|entry| &entry.info)
    }

    /// Snapshot of all live entities in creation order, oldest first.
    ///
    /// Exposed for test harnesses.
    pub fn all(&self) -> Vec<EntityInfo> {
        let mut entries: Vec<&EntityEntry> = self
            .entities
            .values()
            .filter(|entry| !entry.removed)
            .collect();
        entries.sort_by_key(|entry| entry.creation_revno);
        entries.into_iter().map(|entry| entry.info.clone()).collect()
    }

    /// The deltas that move an observer from "knows everything at `revno`"
    /// to "knows everything now", oldest change first.
    ///
    /// Entries both created and removed after `revno` are skipped: such an
    /// entity was never visible to the caller.
    pub fn changes_since(&self, revno: Revno) -> Vec<Delta> {
        self.order
            .range((Bound::Excluded(revno), Bound::Unbounded))
            .filter_map(|(_, id)| {
                let entry = &self.entities[id];
                if entry.removed && entry.creation_revno > revno {
                    return None;
                }
                Some(Delta {
                    removed: entry.removed,
                    entity: entry.info.clone(),
                })
            })
            .collect()
    }

    /// Refcount bookkeeping after an observer at `revno` was served every
    /// change above it.
    ///
    /// Entries new to the observer gain a reference; tombstones the
    /// observer already knew lose one, collecting the entry once nobody is
    /// left to notify.
    pub(crate) fn seen(&mut self, revno: Revno) {
        let recent: Vec<EntityId> = self
            .order
            .range((Bound::Excluded(revno), Bound::Unbounded))
            .map(|(_, id)| id.clone())
            .collect();
        for id in recent {
            let Some(entry) = self.entities.get_mut(&id) else {
                continue;
            };
            if entry.creation_revno > revno {
                if !entry.removed {
                    entry.ref_count += 1;
                }
            } else if entry.removed {
                self.dec_ref(&id);
            }
        }
    }

    /// Refcount bookkeeping when an observer at `revno` departs.
    ///
    /// Every entry the observer had been told exists is dereferenced,
    /// except tombstones whose removal it was already served.
    pub(crate) fn leave(&mut self, revno: Revno) {
        let known: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, entry)| {
                entry.creation_revno <= revno && !(entry.removed && entry.revno <= revno)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in known {
            self.dec_ref(&id);
        }
    }

    fn add(&mut self, id: EntityId, info: EntityInfo) {
        assert!(
            !self.entities.contains_key(&id),
            "adding new entry with duplicate id {id}",
        );
        self.latest_revno += 1;
        let entry = EntityEntry {
            info,
            revno: self.latest_revno,
            creation_revno: self.latest_revno,
            removed: false,
            ref_count: 0,
        };
        self.order.insert(self.latest_revno, id.clone());
        self.entities.insert(id, entry);
    }

    fn dec_ref(&mut self, id: &EntityId) {
        let entry = self
            .entities
            .get_mut(id)
            .unwrap_or_else(|| panic!("refcount decrement on missing entry {id}"));
        assert!(entry.ref_count > 0, "negative reference count for {id}");
        entry.ref_count -= 1;
        if entry.ref_count == 0 && entry.removed {
            let revno = entry.revno;
            self.entities.remove(id);
            self.order.remove(&revno);
        }
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(self.order.len(), self.entities.len());
        for (revno, id) in &self.order {
            let entry = self.entities.get(id).expect("order entry missing from table");
            assert_eq!(entry.revno, *revno);
            assert!(entry.creation_revno >= 1);
            assert!(entry.creation_revno <= entry.revno);
            assert!(entry.revno <= self.latest_revno);
            assert!(
                !(entry.removed && entry.ref_count == 0),
                "uncollected tombstone for {id}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::entity::{EntityKind, MachineInfo};

    fn machine(id: &str, status: &str) -> EntityInfo {
        EntityInfo::Machine(MachineInfo {
            id: id.into(),
            status: status.into(),
            ..Default::default()
        })
    }

    fn machine_id(id: &str) -> EntityId {
        EntityId::new(EntityKind::Machine, id)
    }

    fn delta_ids(deltas: &[Delta]) -> Vec<(EntityId, bool)> {
        deltas
            .iter()
            .map(|delta| (delta.entity.entity_id(), delta.removed))
            .collect()
    }

    #[test]
    fn update_assigns_monotonic_revnos() {
        let mut store = Store::new();
        assert_eq!(store.latest_revno(), 0);
        store.update(machine("0", "pending"));
        assert_eq!(store.latest_revno(), 1);
        store.update(machine("1", "pending"));
        assert_eq!(store.latest_revno(), 2);
        store.update(machine("0", "started"));
        assert_eq!(store.latest_revno(), 3);
        store.check_invariants();
    }

    #[test]
    fn equal_update_is_a_noop() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.update(machine("0", "pending"));
        assert_eq!(store.latest_revno(), 1);
        assert!(store.changes_since(1).is_empty());
        store.check_invariants();
    }

    #[test]
    fn update_moves_the_entry_to_the_front() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.update(machine("1", "pending"));
        store.update(machine("0", "started"));
        // Oldest changed first: machine 1 then the restamped machine 0.
        assert_eq!(
            delta_ids(&store.changes_since(1)),
            vec![(machine_id("1"), false), (machine_id("0"), false)]
        );
        store.check_invariants();
    }

    #[test]
    fn remove_of_unknown_or_tombstoned_entity_is_a_noop() {
        let mut store = Store::new();
        store.remove(&machine_id("0"));
        assert_eq!(store.latest_revno(), 0);

        store.update(machine("0", "pending"));
        store.seen(0); // one observer now references machine 0
        store.remove(&machine_id("0"));
        let revno = store.latest_revno();
        store.remove(&machine_id("0"));
        assert_eq!(store.latest_revno(), revno);
        store.check_invariants();
    }

    #[test]
    fn remove_of_an_unseen_entity_drops_it_outright() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.remove(&machine_id("0"));
        assert_eq!(store.latest_revno(), 2);
        assert!(store.get_including_removed(&machine_id("0")).is_none());
        assert!(store.changes_since(0).is_empty());
        store.check_invariants();
    }

    #[test]
    fn remove_of_a_seen_entity_leaves_a_tombstone() {
        let mut store = Store::new();
        store.update(machine("0", "running"));
        store.seen(0);
        store.remove(&machine_id("0"));

        assert!(store.get(&machine_id("0")).is_none());
        assert_eq!(
            store.get_including_removed(&machine_id("0")),
            Some(&machine("0", "running"))
        );
        // The observer that saw it alive still gets the removal delta,
        // carrying the last known payload.
        let deltas = store.changes_since(1);
        assert_eq!(delta_ids(&deltas), vec![(machine_id("0"), true)]);
        assert_eq!(deltas[0].entity, machine("0", "running"));
        store.check_invariants();
    }

    #[test]
    fn changes_since_skips_entities_created_and_removed_after_the_cursor() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        // Observer A drains everything and pins machine 1 once it appears.
        store.seen(0);
        store.update(machine("1", "pending"));
        store.seen(1);
        store.remove(&machine_id("1"));

        // A (at revno 2) is told about the removal.
        assert_eq!(
            delta_ids(&store.changes_since(2)),
            vec![(machine_id("1"), true)]
        );
        // A brand new observer never hears of machine 1 at all.
        assert_eq!(
            delta_ids(&store.changes_since(0)),
            vec![(machine_id("0"), false)]
        );
        store.check_invariants();
    }

    #[test]
    fn changes_since_latest_is_empty() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.update(machine("1", "pending"));
        assert!(store.changes_since(store.latest_revno()).is_empty());
    }

    #[test]
    fn tombstone_collected_when_the_last_reference_is_served() {
        let mut store = Store::new();
        store.update(machine("0", "running"));
        store.seen(0); // observer A
        store.seen(0); // observer B
        store.remove(&machine_id("0"));
        store.check_invariants();

        // A is served the removal; B still holds a reference.
        store.seen(1);
        assert!(store.get_including_removed(&machine_id("0")).is_some());

        // B is served; the tombstone is collected.
        store.seen(1);
        assert!(store.get_including_removed(&machine_id("0")).is_none());
        assert!(store.entities.is_empty());
        store.check_invariants();
    }

    #[test]
    fn leave_releases_everything_the_observer_saw() {
        let mut store = Store::new();
        store.update(machine("0", "running"));
        store.update(machine("1", "running"));
        store.seen(0); // observer at revno 2
        store.remove(&machine_id("0"));

        // The observer departs without ever being told about the removal:
        // both its references are dropped and the tombstone is collected.
        store.leave(2);
        assert!(store.get_including_removed(&machine_id("0")).is_none());
        let entry = store.entities.get(&machine_id("1")).unwrap();
        assert_eq!(entry.ref_count, 0);
        store.check_invariants();
    }

    #[test]
    fn leave_skips_tombstones_already_delivered() {
        let mut store = Store::new();
        store.update(machine("0", "running"));
        store.seen(0);
        store.remove(&machine_id("0"));
        store.update(machine("1", "running"));
        // Served the removal of 0 and the creation of 1; the tombstone is
        // collected here.
        store.seen(1);
        store.check_invariants();

        // Departing must not touch the already-delivered removal again.
        store.leave(store.latest_revno());
        let entry = store.entities.get(&machine_id("1")).unwrap();
        assert_eq!(entry.ref_count, 0);
        store.check_invariants();
    }

    #[test]
    fn update_revives_a_tombstone_in_place() {
        let mut store = Store::new();
        store.update(machine("0", "running"));
        store.seen(0);
        store.remove(&machine_id("0"));
        store.update(machine("0", "restarted"));

        let entry = store.entities.get(&machine_id("0")).unwrap();
        assert!(!entry.removed);
        assert_eq!(entry.creation_revno, 1);
        assert_eq!(entry.ref_count, 1);
        assert_eq!(store.get(&machine_id("0")), Some(&machine("0", "restarted")));
        store.check_invariants();
    }

    #[test]
    fn all_returns_live_entities_in_creation_order() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.update(machine("1", "pending"));
        store.update(machine("2", "pending"));
        store.update(machine("0", "started")); // restamp must not reorder
        store.seen(0);
        store.remove(&machine_id("1"));

        let ids: Vec<EntityId> = store.all().iter().map(EntityInfo::entity_id).collect();
        assert_eq!(ids, vec![machine_id("0"), machine_id("2")]);
    }

    #[test]
    #[should_panic(expected = "duplicate id")]
    fn duplicate_add_panics() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.add(machine_id("0"), machine("0", "other"));
    }

    #[test]
    #[should_panic(expected = "negative reference count")]
    fn refcount_underflow_panics() {
        let mut store = Store::new();
        store.update(machine("0", "pending"));
        store.dec_ref(&machine_id("0"));
    }

    #[test]
    fn randomized_operations_maintain_invariants_and_the_replay_law() {
        struct SimObserver {
            revno: Revno,
            view: HashMap<EntityId, EntityInfo>,
        }

        let mut rng = StdRng::seed_from_u64(0x5eed_feed);
        let mut store = Store::new();
        let mut observers: Vec<SimObserver> = Vec::new();
        let statuses = ["pending", "started", "stopping", "down"];
        // Ids the backing has created and not yet removed. Removed ids are
        // never reused, matching how real backings allocate identities.
        let mut active: Vec<String> = Vec::new();
        let mut next_id = 0u64;

        for step in 0..4000 {
            match rng.random_range(0..100) {
                0..20 => {
                    let id = next_id.to_string();
                    next_id += 1;
                    active.push(id.clone());
                    store.update(machine(&id, "pending"));
                }
                // Update a live entity; an unchanged status makes it a no-op.
                20..45 => {
                    if active.is_empty() {
                        continue;
                    }
                    let id = active[rng.random_range(0..active.len())].clone();
                    let status = statuses[rng.random_range(0..statuses.len())];
                    store.update(machine(&id, status));
                }
                45..60 => {
                    if active.is_empty() {
                        continue;
                    }
                    let pick = rng.random_range(0..active.len());
                    let id = active.swap_remove(pick);
                    store.remove(&machine_id(&id));
                }
                60..78 => {
                    if observers.len() < 4 {
                        observers.push(SimObserver {
                            revno: 0,
                            view: HashMap::new(),
                        });
                    }
                }
                78..95 => {
                    // Drain one observer the way the coordinator would.
                    if observers.is_empty() {
                        continue;
                    }
                    let pick = rng.random_range(0..observers.len());
                    let observer = &mut observers[pick];
                    let changes = store.changes_since(observer.revno);
                    if changes.is_empty() {
                        continue;
                    }
                    for delta in &changes {
                        let id = delta.entity.entity_id();
                        if delta.removed {
                            observer.view.remove(&id);
                        } else {
                            observer.view.insert(id, delta.entity.clone());
                        }
                    }
                    let previous = observer.revno;
                    observer.revno = store.latest_revno();
                    store.seen(previous);

                    let visible: HashMap<EntityId, EntityInfo> = store
                        .all()
                        .into_iter()
                        .map(|info| (info.entity_id(), info))
                        .collect();
                    assert_eq!(observers[pick].view, visible, "replay law at step {step}");
                }
                _ => {
                    if observers.is_empty() {
                        continue;
                    }
                    let pick = rng.random_range(0..observers.len());
                    let observer = observers.swap_remove(pick);
                    store.leave(observer.revno);
                }
            }
            store.check_invariants();
        }

        for observer in observers.drain(..) {
            store.leave(observer.revno);
        }
        store.check_invariants();
        assert!(
            store.entities.values().all(|entry| !entry.removed),
            "tombstones must not outlive their observers"
        );
    }
}
