//! Content-addressed mesh templates and GPU instancing.
//!
//! The first successful non-skinned load of a locator stores its mesh as the
//! canonical template. Entities asking for `instanced` placement register with
//! an [`InstanceManager`] that renders the template once per registered
//! transform instead of each entity drawing its own subtree.

use std::{collections::HashMap, rc::Rc};

use crate::data_structures::{
    instance::{InstanceRaw, SharedTransform},
    mesh_group::MeshGroup,
};

pub trait InstanceManager {
    /// Registers one instance of `locator`; the returned index identifies it.
    fn register_model(
        &mut self,
        locator: &str,
        canonical: Rc<MeshGroup>,
        transform: SharedTransform,
    ) -> usize;

    fn unregister_model(&mut self, locator: &str, index: usize);
}

/// Locator to canonical mesh. Lives as long as its owner; entries are never evicted.
#[derive(Debug, Default)]
pub struct MeshInstanceCache {
    templates: HashMap<String, Rc<MeshGroup>>,
}

impl MeshInstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, locator: &str) -> Option<Rc<MeshGroup>> {
        self.templates.get(locator).cloned()
    }

    /// Stores `mesh_group` as the template for `locator` unless one exists.
    ///
    /// Returns the template and whether this call inserted it.
    pub fn insert_if_absent(&mut self, locator: &str, mesh_group: &MeshGroup) -> (Rc<MeshGroup>, bool) {
        if let Some(template) = self.templates.get(locator) {
            return (template.clone(), false);
        }
        let template = Rc::new(mesh_group.clone());
        self.templates.insert(locator.to_string(), template.clone());
        (template, true)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }
}

/// Where a loaded mesh is rendered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// The entity's own subtree sits under its transform node.
    Direct,
    /// The subtree is out of the scene graph; the instance manager draws the template.
    Instanced { index: usize },
}

/// Outcome of running a freshly loaded mesh through the cache policy.
pub(crate) struct ResolvedMesh {
    pub mesh_group: MeshGroup,
    /// Present when the mesh may be instanced.
    pub template: Option<Rc<MeshGroup>>,
    /// The loaded copy, when the cached template replaced it.
    pub discarded: Option<MeshGroup>,
}

pub(crate) fn resolve_mesh(
    cache: &mut MeshInstanceCache,
    locator: &str,
    mesh_group: MeshGroup,
) -> ResolvedMesh {
    if mesh_group.is_skinned() {
        log::debug!("{} is skinned and will never be instanced", locator);
        return ResolvedMesh {
            mesh_group,
            template: None,
            discarded: None,
        };
    }
    let (template, inserted) = cache.insert_if_absent(locator, &mesh_group);
    if inserted {
        log::debug!("{} is now the canonical mesh template", locator);
        ResolvedMesh {
            mesh_group,
            template: Some(template),
            discarded: None,
        }
    } else {
        ResolvedMesh {
            mesh_group: (*template).clone(),
            template: Some(template),
            discarded: Some(mesh_group),
        }
    }
}

struct InstanceBatch {
    template: Rc<MeshGroup>,
    slots: Vec<Option<SharedTransform>>,
    free: Vec<usize>,
}

/**
 * Instance manager that keeps one batch per locator and packs the registered
 * world transforms into [`InstanceRaw`] data, ready to be written to an instance
 * buffer. Freed indices are reused by later registrations.
 */
#[derive(Default)]
pub struct InstanceBatches {
    batches: HashMap<String, InstanceBatch>,
}

impl InstanceBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self, locator: &str) -> usize {
        self.batches
            .get(locator)
            .map(|batch| batch.slots.iter().filter(|slot| slot.is_some()).count())
            .unwrap_or(0)
    }

    pub fn total_instances(&self) -> usize {
        self.batches
            .keys()
            .map(|locator| self.instance_count(locator))
            .sum()
    }

    pub fn template(&self, locator: &str) -> Option<Rc<MeshGroup>> {
        self.batches.get(locator).map(|batch| batch.template.clone())
    }

    pub fn raw_instances(&self, locator: &str) -> Vec<InstanceRaw> {
        self.batches
            .get(locator)
            .map(|batch| {
                batch
                    .slots
                    .iter()
                    .flatten()
                    .map(|transform| transform.borrow().to_raw())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Instance buffer contents for `locator`.
    pub fn instance_bytes(&self, locator: &str) -> Vec<u8> {
        bytemuck::cast_slice(&self.raw_instances(locator)).to_vec()
    }
}

impl InstanceManager for InstanceBatches {
    fn register_model(
        &mut self,
        locator: &str,
        canonical: Rc<MeshGroup>,
        transform: SharedTransform,
    ) -> usize {
        let batch = self
            .batches
            .entry(locator.to_string())
            .or_insert_with(|| InstanceBatch {
                template: canonical,
                slots: Vec::new(),
                free: Vec::new(),
            });
        match batch.free.pop() {
            Some(index) => {
                batch.slots[index] = Some(transform);
                index
            }
            None => {
                batch.slots.push(Some(transform));
                batch.slots.len() - 1
            }
        }
    }

    fn unregister_model(&mut self, locator: &str, index: usize) {
        let Some(batch) = self.batches.get_mut(locator) else {
            log::warn!("tried to unregister instance {} of unknown model {}", index, locator);
            return;
        };
        match batch.slots.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                batch.free.push(index);
            }
            _ => log::warn!("instance {} of {} is not registered", index, locator),
        }
    }
}
