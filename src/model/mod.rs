//! Model entities and the scene that owns them.
//!
//! A model entity loads a mesh (`src`) and optionally a separate animation
//! (`anim`), places the mesh directly or through GPU instancing, hosts socket
//! children on named joints and composes attached models into one animated
//! hierarchy. Everything cross-entity lives on [`scene::ModelScene`]; this module
//! only holds the per-entity state.

use std::{cell::RefCell, rc::Rc};

use crate::{
    context::ColliderHelper,
    data_structures::{
        bounds::OrientedBox,
        instance::{Instance, SharedTransform},
        mesh_group::{BoneTable, MeshGroup, NodeIndex},
    },
};

use self::{
    attachments::AttachmentSet,
    attributes::ModelAttributes,
    instancing::Placement,
    loading::LoadCoordinator,
    sockets::SocketTable,
    timeline::AnimationTimeline,
};

pub mod attachments;
pub mod attributes;
pub mod instancing;
pub mod loading;
pub mod mixer;
pub mod scene;
pub mod sockets;
pub mod timeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

/// How an entity hangs from its markup parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentLink {
    /// Directly under the parent's transform.
    Root,
    /// Under a joint of the parent's loaded mesh.
    Joint(NodeIndex),
    /// Temporarily taken off the skeleton while the parent rebuilds its animation.
    Detached,
}

/// Everything one successful `src` load produced.
#[derive(Debug)]
pub struct LoadedState {
    pub locator: String,
    pub mesh_group: MeshGroup,
    pub bone_table: BoneTable,
    pub bounding_box: OrientedBox,
    pub placement: Placement,
    /// Canonical mesh, present only for meshes that may be instanced.
    pub(crate) template: Option<Rc<MeshGroup>>,
}

impl LoadedState {
    pub fn is_instanceable(&self) -> bool {
        self.template.is_some()
    }
}

pub(crate) struct ModelEntity {
    pub id: EntityId,
    pub attributes: ModelAttributes,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    pub link: ParentLink,
    pub local: Instance,
    pub world: SharedTransform,
    pub connected: bool,
    pub src_load: LoadCoordinator,
    pub anim_load: LoadCoordinator,
    pub loaded: Option<LoadedState>,
    pub sockets: SocketTable,
    pub sockets_disabled: bool,
    pub attachments: AttachmentSet,
    /// Back-reference maintained only by attachment registration.
    pub attachment_parent: Option<EntityId>,
    pub timeline: AnimationTimeline,
    pub colliders: Box<dyn ColliderHelper>,
    pub debug_box: Option<OrientedBox>,
}

impl ModelEntity {
    pub fn new(
        id: EntityId,
        attributes: ModelAttributes,
        src_load: LoadCoordinator,
        anim_load: LoadCoordinator,
        colliders: Box<dyn ColliderHelper>,
    ) -> Self {
        Self {
            id,
            attributes,
            parent: None,
            children: Vec::new(),
            link: ParentLink::Root,
            local: Instance::new(),
            world: Rc::new(RefCell::new(Instance::new())),
            connected: false,
            src_load,
            anim_load,
            loaded: None,
            sockets: SocketTable::default(),
            sockets_disabled: false,
            attachments: AttachmentSet::default(),
            attachment_parent: None,
            timeline: AnimationTimeline::default(),
            colliders,
            debug_box: None,
        }
    }
}

impl std::fmt::Debug for ModelEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEntity")
            .field("id", &self.id)
            .field("src", &self.src_load.locator())
            .field("anim", &self.anim_load.locator())
            .field("connected", &self.connected)
            .field("loaded", &self.loaded.is_some())
            .finish_non_exhaustive()
    }
}
