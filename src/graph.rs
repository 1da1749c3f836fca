//! Walks over the element graph of a [DataModel].

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet, map::Entry};
use uuid::Uuid as UUID;

use crate::DataModel;

/// Counts how many attribute slots refer to each element reachable from the root.
///
/// Elements are visited breadth first and the map is in discovery order. The root starts at 0 and
/// every element array entry counts as its own slot.
pub fn collect_users(model: &DataModel) -> IndexMap<UUID, usize> {
    let mut users = IndexMap::new();

    let Some(root) = model.root_id() else {
        return users;
    };

    users.insert(root, 0);
    let mut queue = VecDeque::from([root]);

    while let Some(id) = queue.pop_front() {
        let Some(element) = model.get_element(id) else {
            continue;
        };

        for target in element.referenced_elements() {
            match users.entry(target) {
                Entry::Occupied(mut entry) => *entry.get_mut() += 1,
                Entry::Vacant(entry) => {
                    entry.insert(1);
                    queue.push_back(target);
                }
            }
        }
    }

    users
}

/// Returns the ids of `start` and every element reachable from them, breadth first.
///
/// Ids that are not in the model are left out.
pub fn reachable_elements(model: &DataModel, start: &[UUID]) -> IndexSet<UUID> {
    let mut reachable = IndexSet::new();
    let mut queue = VecDeque::new();

    for id in start {
        if model.get_element(*id).is_some() && reachable.insert(*id) {
            queue.push_back(*id);
        }
    }

    while let Some(id) = queue.pop_front() {
        let Some(element) = model.get_element(id) else {
            continue;
        };

        for target in element.referenced_elements() {
            if model.get_element(target).is_some() && reachable.insert(target) {
                queue.push_back(target);
            }
        }
    }

    reachable
}

/// An attribute slot holding a reference that was read before its target was defined.
#[derive(Clone, Debug)]
pub(crate) struct ReferenceSlot {
    pub owner: UUID,
    pub attribute: String,
    pub index: Option<usize>,
}

/// References recorded while reading, keyed by target, checked once the whole input has been read.
#[derive(Debug, Default)]
pub(crate) struct PendingReferences {
    references: IndexMap<UUID, Vec<ReferenceSlot>>,
}

impl PendingReferences {
    pub fn record(&mut self, target: UUID, owner: UUID, attribute: impl Into<String>, index: Option<usize>) {
        self.references.entry(target).or_default().push(ReferenceSlot {
            owner,
            attribute: attribute.into(),
            index,
        });
    }

    /// Returns the targets with no definition in `model`, each with the first slot that refers to it.
    pub fn unresolved<'a>(&'a self, model: &'a DataModel) -> impl Iterator<Item = (UUID, &'a ReferenceSlot)> + 'a {
        self.references.iter().filter_map(move |(target, slots)| {
            let defined = model.get_element(*target).is_some_and(|element| !element.is_placeholder());
            match (defined, slots.first()) {
                (false, Some(slot)) => Some((*target, slot)),
                _ => None,
            }
        })
    }
}
