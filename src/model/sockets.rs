//! Named attachment points on a model's skeleton.
//!
//! Children register under a joint name. The name, not the joint node, is the
//! key, so registrations survive reloads: after every load the names are
//! resolved again against the new bone table and missing joints fall back to
//! the entity root.

use std::collections::BTreeMap;

use crate::{
    data_structures::mesh_group::NodeIndex,
    model::{EntityId, ParentLink, scene::ModelScene},
};

#[derive(Debug, Default)]
pub struct SocketTable {
    sockets: BTreeMap<String, Vec<EntityId>>,
}

impl SocketTable {
    /// Puts `child` under `joint`, removing it from any other joint first.
    pub fn insert(&mut self, child: EntityId, joint: &str) {
        self.remove(child);
        let children = self.sockets.entry(joint.to_string()).or_default();
        children.push(child);
    }

    /// Removes `child` and returns the joint it was registered under.
    pub fn remove(&mut self, child: EntityId) -> Option<String> {
        let joint = self.joint_of(child)?.to_string();
        if let Some(children) = self.sockets.get_mut(&joint) {
            children.retain(|c| *c != child);
            if children.is_empty() {
                self.sockets.remove(&joint);
            }
        }
        Some(joint)
    }

    pub fn joint_of(&self, child: EntityId) -> Option<&str> {
        self.sockets
            .iter()
            .find(|(_, children)| children.contains(&child))
            .map(|(joint, _)| joint.as_str())
    }

    pub fn contains(&self, child: EntityId) -> bool {
        self.joint_of(child).is_some()
    }

    pub fn children(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.sockets.values().flatten().copied()
    }

    pub fn entries(&self) -> Vec<(String, EntityId)> {
        self.sockets
            .iter()
            .flat_map(|(joint, children)| children.iter().map(move |c| (joint.clone(), *c)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sockets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

impl ModelScene {
    /**
     * Attaches `child` to `parent` at `joint`.
     *
     * `child` becomes a markup child of `parent` if it is not one already. It is
     * placed on the joint when the parent's current mesh has it and on the parent
     * root otherwise; either way it is never left without a parent.
     */
    pub fn register_socket_child(&mut self, parent: EntityId, child: EntityId, joint: &str) {
        if parent == child || !self.entities.contains_key(&child) {
            log::warn!("cannot socket entity {:?} onto {:?}", child, parent);
            return;
        }
        if self.entities.get(&child).and_then(|c| c.parent) != Some(parent) {
            self.append_child(parent, child);
        }
        let Some(entity) = self.entities.get_mut(&parent) else {
            return;
        };
        entity.sockets.insert(child, joint);
        if entity.sockets_disabled {
            // picked up by restore_sockets once the skeleton is rebuilt
            if let Some(c) = self.entities.get_mut(&child) {
                c.link = ParentLink::Detached;
            }
            return;
        }
        let link = self.resolve_joint(parent, joint);
        self.set_link(child, link);
    }

    /// Removes `child` from `parent`'s sockets and leaves it on the parent root.
    pub fn unregister_socket_child(&mut self, parent: EntityId, child: EntityId) {
        if let Some(entity) = self.entities.get_mut(&parent) {
            entity.sockets.remove(child);
        }
        if self.entities.get(&child).and_then(|c| c.parent) == Some(parent) {
            self.set_link(child, ParentLink::Root);
        }
    }

    /// Detaches every socket child so the skeleton can be rebuilt without them.
    pub fn disable_sockets(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.sockets_disabled = true;
        let children: Vec<EntityId> = entity.sockets.children().collect();
        for child in children {
            if let Some(c) = self.entities.get_mut(&child) {
                c.link = ParentLink::Detached;
            }
        }
    }

    /// Resolves every socket against the current mesh and reattaches the children.
    pub fn restore_sockets(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.sockets_disabled = false;
        for (joint, child) in entity.sockets.entries() {
            let link = self.resolve_joint(id, &joint);
            self.set_link(child, link);
        }
    }

    /// The joint node `child` currently hangs from, if any.
    pub fn socket_parent(&self, child: EntityId) -> Option<(EntityId, ParentLink)> {
        let entity = self.entities.get(&child)?;
        Some((entity.parent?, entity.link))
    }

    pub(crate) fn resolve_joint(&self, parent: EntityId, joint: &str) -> ParentLink {
        self.entities
            .get(&parent)
            .and_then(|entity| entity.loaded.as_ref())
            .and_then(|loaded| loaded.bone_table.resolve(joint))
            .map(ParentLink::Joint)
            .unwrap_or(ParentLink::Root)
    }

    /// Tells every socket child of `id` that the joint it hangs from may have moved.
    pub(crate) fn notify_socket_children(&mut self, id: EntityId) {
        let children: Vec<EntityId> = match self.entities.get(&id) {
            Some(entity) => entity.sockets.children().collect(),
            None => return,
        };
        for child in children {
            self.parent_transformed(child);
        }
    }

    pub(crate) fn set_link(&mut self, child: EntityId, link: ParentLink) {
        if let Some(c) = self.entities.get_mut(&child) {
            c.link = link;
        }
        self.parent_transformed(child);
    }
}

/// Joint node a link points at, if it is one.
pub(crate) fn joint_node(link: ParentLink) -> Option<NodeIndex> {
    match link {
        ParentLink::Joint(node) => Some(node),
        ParentLink::Root | ParentLink::Detached => None,
    }
}
