//! Composition of several models into one animated hierarchy.
//!
//! The parent's [`AttachmentSet`] is the membership record. The child only keeps
//! a back-reference (`attachment_parent`) which is written here and nowhere else.

use std::collections::BTreeSet;

use crate::model::{EntityId, scene::ModelScene};

#[derive(Debug, Default)]
pub struct AttachmentSet {
    members: BTreeSet<EntityId>,
}

impl AttachmentSet {
    pub fn insert(&mut self, child: EntityId) -> bool {
        self.members.insert(child)
    }

    pub fn remove(&mut self, child: EntityId) -> bool {
        self.members.remove(&child)
    }

    pub fn contains(&self, child: EntityId) -> bool {
        self.members.contains(&child)
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl ModelScene {
    /**
     * Makes `child` follow `parent`'s animation.
     *
     * The child leaves any previous attachment parent first. Its mesh joins the
     * parent's running mixer (with its sockets taken off the skeleton meanwhile)
     * and the parent is re-evaluated immediately so the new subtree never shows
     * its bind pose.
     */
    pub fn register_attachment(&mut self, parent: EntityId, child: EntityId) {
        if parent == child || !self.entities.contains_key(&parent) {
            log::warn!("cannot attach entity {:?} to {:?}", child, parent);
            return;
        }
        if self.attachment_parent(parent) == Some(child) {
            log::warn!(
                "entity {:?} is already attached to {:?}, refusing to attach the other way round",
                parent,
                child
            );
            return;
        }
        match self.attachment_parent(child) {
            Some(previous) if previous == parent => return,
            Some(previous) => self.unregister_attachment(previous, child),
            None => {}
        }
        let Some(c) = self.entities.get_mut(&child) else {
            return;
        };
        c.attachment_parent = Some(parent);
        if let Some(p) = self.entities.get_mut(&parent) {
            p.attachments.insert(child);
        }
        log::debug!("entity {:?} attached to {:?}", child, parent);
        self.join_parent_mixer(parent, child);
    }

    /// Removes `child` from `parent`'s animation; its mesh returns to the bind pose.
    pub fn unregister_attachment(&mut self, parent: EntityId, child: EntityId) {
        if let Some(c) = self.entities.get_mut(&child) {
            if c.attachment_parent == Some(parent) {
                c.attachment_parent = None;
            }
        }
        let Some(p) = self.entities.get_mut(&parent) else {
            return;
        };
        if !p.attachments.remove(child) {
            return;
        }
        if let Some(mixer) = p.timeline.mixer.as_mut() {
            mixer.unbind(child);
        }
        if let Some(loaded) = self.entities.get_mut(&child).and_then(|c| c.loaded.as_mut()) {
            loaded.mesh_group.reset_to_bind_pose();
        }
        log::debug!("entity {:?} detached from {:?}", child, parent);
        self.notify_socket_children(child);
    }

    pub fn attachment_parent(&self, child: EntityId) -> Option<EntityId> {
        self.entities.get(&child)?.attachment_parent
    }

    pub fn attachments(&self, parent: EntityId) -> Vec<EntityId> {
        self.entities
            .get(&parent)
            .map(|p| p.attachments.iter().collect())
            .unwrap_or_default()
    }

    /**
     * Binds `child`'s current mesh into `parent`'s running mixer.
     *
     * Runs on registration and again when an attached child's mesh lands later.
     * A child without a mesh or a parent without a mixer is left as it is.
     */
    pub(crate) fn join_parent_mixer(&mut self, parent: EntityId, child: EntityId) {
        self.disable_sockets(child);
        let mixer = self
            .entities
            .get_mut(&parent)
            .and_then(|p| p.timeline.mixer.take());
        if let Some(mut mixer) = mixer {
            if let Some(loaded) = self.entities.get(&child).and_then(|c| c.loaded.as_ref()) {
                mixer.bind(child, &loaded.mesh_group);
            }
            if let Some(p) = self.entities.get_mut(&parent) {
                p.timeline.mixer = Some(mixer);
            }
        }
        self.restore_sockets(child);
        self.update_animation_time(parent, true);
    }

    pub(crate) fn leave_attachment_parent(&mut self, child: EntityId) {
        if let Some(parent) = self.attachment_parent(child) {
            self.unregister_attachment(parent, child);
        }
    }

    /// Joins the markup parent's animation if nothing else drives this entity.
    pub(crate) fn attach_to_markup_parent(&mut self, child: EntityId) {
        let Some(c) = self.entities.get(&child) else {
            return;
        };
        if !c.attributes.anim.trim().is_empty()
            || c.attachment_parent.is_some()
            || c.loaded.is_none()
        {
            return;
        }
        if let Some(parent) = c.parent {
            self.register_attachment(parent, child);
        }
    }
}
