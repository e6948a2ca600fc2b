//! Services shared by every model entity of a scene.
//!
//! [`ModelContext`] plays the role the GPU context plays for rendering: it owns
//! (or shares) the collaborators entities talk to. Everything is injectable so
//! tests can swap in recording doubles and reset the mesh cache per fixture.

use std::{cell::RefCell, rc::Rc};

use crate::{
    data_structures::mesh_group::MeshGroup,
    error::LoadError,
    model::{
        EntityId,
        instancing::{InstanceBatches, InstanceManager, MeshInstanceCache},
        loading::LoadAttribute,
    },
    resources::AssetLoader,
};

/// Receives loading progress for one attribute of one entity.
///
/// Methods take `&self`; implementations that record state use interior mutability.
pub trait ProgressReporter {
    fn start(&self, context: &str, locator: &str);
    fn set_progress(&self, fraction: f32);
    fn finish(&self);
    fn error(&self, err: &LoadError);
    fn abort_if_loading(&self);
    fn dispose(&self);
}

/// Maintains collision geometry for an entity's loaded mesh.
pub trait ColliderHelper {
    fn update_collider(&mut self, mesh_group: &MeshGroup);
    fn remove_colliders(&mut self);
}

/// Reporter that only logs.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn start(&self, context: &str, locator: &str) {
        log::debug!("loading {} '{}'", context, locator);
    }

    fn set_progress(&self, fraction: f32) {
        log::trace!("load progress {:.0}%", fraction * 100.0);
    }

    fn finish(&self) {}

    fn error(&self, err: &LoadError) {
        log::debug!("load reported as failed: {}", err);
    }

    fn abort_if_loading(&self) {}

    fn dispose(&self) {}
}

#[derive(Debug, Default)]
pub struct NoColliders;

impl ColliderHelper for NoColliders {
    fn update_collider(&mut self, _: &MeshGroup) {}

    fn remove_colliders(&mut self) {}
}

pub type ProgressFactory = Box<dyn Fn(EntityId, LoadAttribute) -> Rc<dyn ProgressReporter>>;
pub type ColliderFactory = Box<dyn Fn(EntityId) -> Box<dyn ColliderHelper>>;

pub struct ModelContext {
    pub(crate) loader: Rc<dyn AssetLoader>,
    pub(crate) cache: Rc<RefCell<MeshInstanceCache>>,
    pub(crate) instances: Rc<RefCell<dyn InstanceManager>>,
    pub(crate) progress: ProgressFactory,
    pub(crate) colliders: ColliderFactory,
}

impl ModelContext {
    pub fn new(loader: Rc<dyn AssetLoader>) -> Self {
        Self {
            loader,
            cache: Rc::new(RefCell::new(MeshInstanceCache::new())),
            instances: Rc::new(RefCell::new(InstanceBatches::new())),
            progress: Box::new(|_, _| Rc::new(LogProgress)),
            colliders: Box::new(|_| Box::new(NoColliders)),
        }
    }

    pub fn with_cache(mut self, cache: Rc<RefCell<MeshInstanceCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_instances(mut self, instances: Rc<RefCell<dyn InstanceManager>>) -> Self {
        self.instances = instances;
        self
    }

    pub fn with_progress(
        mut self,
        factory: impl Fn(EntityId, LoadAttribute) -> Rc<dyn ProgressReporter> + 'static,
    ) -> Self {
        self.progress = Box::new(factory);
        self
    }

    pub fn with_colliders(
        mut self,
        factory: impl Fn(EntityId) -> Box<dyn ColliderHelper> + 'static,
    ) -> Self {
        self.colliders = Box::new(factory);
        self
    }

    pub fn cache(&self) -> &Rc<RefCell<MeshInstanceCache>> {
        &self.cache
    }

    pub fn instances(&self) -> &Rc<RefCell<dyn InstanceManager>> {
        &self.instances
    }
}

impl std::fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("cached_templates", &self.cache.borrow().len())
            .finish_non_exhaustive()
    }
}
