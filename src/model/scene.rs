//! The scene owning every model entity.
//!
//! [`ModelScene`] is driven from a single execution context: attribute changes,
//! load completions and document clock ticks all arrive as `&mut self` calls and
//! never interleave. Loads are plain futures kept in a queue; the host either
//! polls them once per frame with [`ModelScene::poll_loads`] or awaits them all
//! with [`ModelScene::settle`].

use std::{
    collections::{BTreeSet, HashMap},
    rc::Rc,
    task::{Context, Poll},
};

use futures::{
    StreamExt,
    future::LocalBoxFuture,
    stream::FuturesUnordered,
};

use crate::{
    context::{ModelContext, ProgressReporter},
    data_structures::{
        bounds::{BoxPose, OrientedBox},
        instance::{Instance, SharedTransform},
        mesh_group::MeshGroup,
    },
    error::{AttributeError, LoadError},
    model::{
        EntityId, LoadedState, ModelEntity, ParentLink,
        attributes::{Attribute, ModelAttributes},
        instancing::{Placement, resolve_mesh},
        loading::{LoadAttribute, LoadCoordinator, LoadRequest, LoadTicket},
        sockets::joint_node,
    },
    resources::{LoadedAsset, ProgressFn},
};

type PendingLoad = LocalBoxFuture<'static, (LoadTicket, anyhow::Result<LoadedAsset>)>;

pub struct ModelScene {
    pub(crate) ctx: ModelContext,
    pub(crate) entities: HashMap<EntityId, ModelEntity>,
    pub(crate) clock_subscribers: BTreeSet<EntityId>,
    pub(crate) document_time: Option<f64>,
    next_id: u32,
    pending: FuturesUnordered<PendingLoad>,
}

impl ModelScene {
    pub fn new(ctx: ModelContext) -> Self {
        Self {
            ctx,
            entities: HashMap::new(),
            clock_subscribers: BTreeSet::new(),
            document_time: None,
            next_id: 0,
            pending: FuturesUnordered::new(),
        }
    }

    pub fn context(&self) -> &ModelContext {
        &self.ctx
    }

    /// Creates a detached entity. Nothing loads until it is connected.
    pub fn create_entity(&mut self, attributes: ModelAttributes) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        let mut src_load = LoadCoordinator::new(
            LoadAttribute::Src,
            (self.ctx.progress)(id, LoadAttribute::Src),
        );
        let mut anim_load = LoadCoordinator::new(
            LoadAttribute::Anim,
            (self.ctx.progress)(id, LoadAttribute::Anim),
        );
        src_load.set(id, &attributes.src, false);
        anim_load.set(id, &attributes.anim, false);
        let colliders = (self.ctx.colliders)(id);
        self.entities.insert(
            id,
            ModelEntity::new(id, attributes, src_load, anim_load, colliders),
        );
        id
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn attributes(&self, id: EntityId) -> Option<&ModelAttributes> {
        Some(&self.entities.get(&id)?.attributes)
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.entities.get(&id)?.parent
    }

    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.entities
            .get(&id)
            .map(|entity| entity.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_connected(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(|entity| entity.connected)
    }

    /**
     * Moves `child` under `parent` in the markup tree.
     *
     * The child leaves its previous parent, including that parent's sockets and
     * attachment set. It ends up connected exactly when the new parent is, and a
     * loaded child joins the new parent's animation right away. Appending to the
     * current parent again keeps the socket placement.
     */
    pub fn append_child(&mut self, parent: EntityId, child: EntityId) {
        if parent == child || !self.contains(parent) || !self.contains(child) {
            log::warn!("cannot append entity {:?} to {:?}", child, parent);
            return;
        }
        let previous = self.parent(child);
        if previous != Some(parent) {
            if let Some(previous) = previous {
                self.leave_parent(previous, child);
            }
            if let Some(c) = self.entities.get_mut(&child) {
                c.parent = Some(parent);
                c.link = ParentLink::Root;
            }
            if let Some(p) = self.entities.get_mut(&parent) {
                if !p.children.contains(&child) {
                    p.children.push(child);
                }
            }
        }
        self.parent_transformed(child);
        match (self.is_connected(parent), self.is_connected(child)) {
            (true, false) => self.connect(child),
            (true, true) => self.attach_to_markup_parent(child),
            (false, true) => self.disconnect(child),
            (false, false) => {}
        }
    }

    fn leave_parent(&mut self, parent: EntityId, child: EntityId) {
        if let Some(p) = self.entities.get_mut(&parent) {
            p.children.retain(|c| *c != child);
            p.sockets.remove(child);
        }
        if self.attachment_parent(child) == Some(parent) {
            self.unregister_attachment(parent, child);
        }
        if let Some(c) = self.entities.get_mut(&child) {
            c.parent = None;
            c.link = ParentLink::Root;
        }
    }

    /// Attaches the entity (and its subtree) to the scene and starts its loads.
    pub fn connect(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if entity.connected {
            return;
        }
        assert!(
            entity.loaded.is_none(),
            "entity {:?} was connected while it still holds a loaded mesh",
            id
        );
        entity.connected = true;
        self.clock_subscribers.insert(id);

        let mut tickets = Vec::new();
        for coordinator in [&mut entity.src_load, &mut entity.anim_load] {
            if !coordinator.locator().is_empty() {
                let ticket = coordinator.begin(id);
                tickets.push((coordinator.progress_fn(&ticket), ticket));
            }
        }
        let children = entity.children.clone();
        for (on_progress, ticket) in tickets {
            self.spawn_load(ticket, on_progress);
        }
        self.parent_transformed(id);
        for child in children {
            self.connect(child);
        }
    }

    /**
     * Detaches the entity (and its subtree) from the scene.
     *
     * Pending loads become stale, the loaded mesh, colliders and debug visuals are
     * released, and playback stops. Locators are kept so a later `connect` loads
     * them again.
     */
    pub fn disconnect(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        if !entity.connected {
            return;
        }
        for child in entity.children.clone() {
            self.disconnect(child);
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.connected = false;
            entity.src_load.invalidate();
            entity.anim_load.invalidate();
        }
        self.clock_subscribers.remove(&id);
        self.leave_attachment_parent(id);
        self.clear_animation(id);
        self.teardown_loaded(id);
        if let Some(entity) = self.entities.get(&id) {
            entity.src_load.progress().dispose();
            entity.anim_load.progress().dispose();
        }
        log::debug!("entity {:?} disconnected", id);
    }

    /// Applies one markup attribute change.
    pub fn set_attribute(
        &mut self,
        id: EntityId,
        name: &str,
        value: &str,
    ) -> Result<(), AttributeError> {
        match Attribute::parse(name, value)? {
            Attribute::Src(src) => self.set_src(id, &src),
            Attribute::Anim(anim) => self.set_anim(id, &anim),
            Attribute::Instanced(instanced) => self.set_instanced(id, instanced),
            Attribute::CastShadows(cast) => self.set_cast_shadows(id, cast),
            Attribute::Debug(debug) => self.set_debug(id, debug),
            Attribute::AnimLoop(looping) => self.set_anim_loop(id, looping),
            Attribute::AnimEnabled(enabled) => self.set_anim_enabled(id, enabled),
            Attribute::AnimStartTime(ms) => self.set_anim_start_time(id, ms),
            Attribute::AnimPauseTime(ms) => self.set_anim_pause_time(id, ms),
        }
        Ok(())
    }

    /// Changes the mesh locator. The current mesh is torn down right away.
    pub fn set_src(&mut self, id: EntityId, src: &str) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.attributes.src = src.to_string();
        if entity.src_load.locator() == src.trim() {
            return;
        }
        self.leave_attachment_parent(id);
        self.teardown_loaded(id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let connected = entity.connected;
        match entity.src_load.set(id, src, connected) {
            LoadRequest::Start(ticket) => {
                let on_progress = entity.src_load.progress_fn(&ticket);
                self.spawn_load(ticket, on_progress);
            }
            LoadRequest::Clear | LoadRequest::Defer => {}
        }
    }

    /**
     * Changes the animation locator.
     *
     * An entity with its own animation never follows its attachment parent, so a
     * non-empty locator leaves the parent's attachment set before anything else.
     * Clearing it lets a loaded entity rejoin its markup parent.
     */
    pub fn set_anim(&mut self, id: EntityId, anim: &str) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.attributes.anim = anim.to_string();
        if entity.anim_load.locator() == anim.trim() {
            return;
        }
        if !anim.trim().is_empty() {
            self.leave_attachment_parent(id);
        }
        self.clear_animation(id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let connected = entity.connected;
        match entity.anim_load.set(id, anim, connected) {
            LoadRequest::Start(ticket) => {
                let on_progress = entity.anim_load.progress_fn(&ticket);
                self.spawn_load(ticket, on_progress);
            }
            LoadRequest::Clear => self.attach_to_markup_parent(id),
            LoadRequest::Defer => {}
        }
    }

    /// Re-runs the placement decision without reloading.
    pub fn set_instanced(&mut self, id: EntityId, instanced: bool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.attributes.instanced = instanced;
            self.apply_placement(id);
        }
    }

    pub fn set_cast_shadows(&mut self, id: EntityId, cast_shadows: bool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.attributes.cast_shadows = cast_shadows;
            if let Some(loaded) = entity.loaded.as_mut() {
                loaded.mesh_group.set_cast_shadows(cast_shadows);
            }
        }
    }

    pub fn set_debug(&mut self, id: EntityId, debug: bool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.attributes.debug = debug;
            entity.debug_box = match (&entity.loaded, debug) {
                (Some(loaded), true) => Some(loaded.bounding_box.clone()),
                _ => None,
            };
        }
    }

    /// Sets the entity's local transform and refreshes everything hanging below it.
    pub fn set_transform(&mut self, id: EntityId, local: Instance) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.local = local;
            self.parent_transformed(id);
        }
    }

    pub fn local_transform(&self, id: EntityId) -> Option<&Instance> {
        Some(&self.entities.get(&id)?.local)
    }

    pub fn world_transform(&self, id: EntityId) -> Option<Instance> {
        Some(self.entities.get(&id)?.world.borrow().clone())
    }

    /// The transform source handed to the instance manager.
    pub fn shared_transform(&self, id: EntityId) -> Option<SharedTransform> {
        Some(self.entities.get(&id)?.world.clone())
    }

    pub fn loaded_state(&self, id: EntityId) -> Option<&LoadedState> {
        self.entities.get(&id)?.loaded.as_ref()
    }

    /// The entity's current mesh subtree, if one is loaded.
    pub fn get_model(&self, id: EntityId) -> Option<&MeshGroup> {
        self.loaded_state(id).map(|loaded| &loaded.mesh_group)
    }

    pub fn instance_index(&self, id: EntityId) -> Option<usize> {
        match self.loaded_state(id)?.placement {
            Placement::Instanced { index } => Some(index),
            Placement::Direct => None,
        }
    }

    /// True when the entity's own subtree sits under its transform node.
    pub fn is_mesh_placed(&self, id: EntityId) -> bool {
        self.loaded_state(id)
            .is_some_and(|loaded| loaded.placement == Placement::Direct)
    }

    /// The tracked box; zero-sized while nothing is loaded.
    pub fn bounding_box(&self, id: EntityId) -> OrientedBox {
        self.loaded_state(id)
            .map(|loaded| loaded.bounding_box.clone())
            .unwrap_or_default()
    }

    /// The tracked box placed at the entity's current world transform.
    pub fn bounding_box_pose(&self, id: EntityId) -> Option<BoxPose> {
        let entity = self.entities.get(&id)?;
        let loaded = entity.loaded.as_ref()?;
        Some(loaded.bounding_box.pose(&entity.world.borrow()))
    }

    /// The debug box, present while `debug` is on and a mesh is loaded.
    pub fn debug_bounds(&self, id: EntityId) -> Option<BoxPose> {
        let entity = self.entities.get(&id)?;
        let debug_box = entity.debug_box.as_ref()?;
        Some(debug_box.pose(&entity.world.borrow()))
    }

    pub fn is_loading(&self, id: EntityId, attribute: LoadAttribute) -> bool {
        self.entities.get(&id).is_some_and(|entity| match attribute {
            LoadAttribute::Src => entity.src_load.is_loading(),
            LoadAttribute::Anim => entity.anim_load.is_loading(),
        })
    }

    /// Number of started loads whose futures have not completed yet.
    pub fn pending_loads(&self) -> usize {
        self.pending.len()
    }

    fn spawn_load(&mut self, ticket: LoadTicket, on_progress: ProgressFn) {
        let load = self.ctx.loader.load(&ticket.locator, on_progress);
        let started = instant::Instant::now();
        self.pending.push(Box::pin(async move {
            let result = load.await;
            log::debug!(
                "{} '{}' for {:?} finished after {:?}",
                ticket.attribute,
                ticket.locator,
                ticket.entity,
                started.elapsed()
            );
            (ticket, result)
        }));
    }

    /// Applies every load that has completed by now without waiting for the rest.
    ///
    /// Returns the number of completions handled, stale ones included.
    pub fn poll_loads(&mut self) -> usize {
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        let mut handled = 0;
        while let Poll::Ready(Some((ticket, result))) = self.pending.poll_next_unpin(&mut cx) {
            self.complete_load(ticket, result);
            handled += 1;
        }
        handled
    }

    /// Waits for every pending load, including loads started by completions.
    pub async fn settle(&mut self) {
        while let Some((ticket, result)) = self.pending.next().await {
            self.complete_load(ticket, result);
        }
    }

    fn complete_load(&mut self, ticket: LoadTicket, result: anyhow::Result<LoadedAsset>) {
        let Some(entity) = self.entities.get_mut(&ticket.entity) else {
            if let Ok(asset) = result {
                self.ctx.loader.release(asset.mesh_group);
            }
            return;
        };
        let coordinator = match ticket.attribute {
            LoadAttribute::Src => &mut entity.src_load,
            LoadAttribute::Anim => &mut entity.anim_load,
        };
        if !entity.connected || !coordinator.complete(&ticket) {
            log::debug!(
                "discarding stale {} result '{}' for {:?}",
                ticket.attribute,
                ticket.locator,
                ticket.entity
            );
            if let Ok(asset) = result {
                self.ctx.loader.release(asset.mesh_group);
            }
            return;
        }
        let progress = coordinator.progress().clone();

        let asset = match result {
            Ok(asset) => asset,
            Err(source) => {
                let err = LoadError::Failed {
                    attribute: ticket.attribute,
                    locator: ticket.locator,
                    source,
                };
                log::error!("{:?}: {:#}", ticket.entity, err);
                progress.error(&err);
                return;
            }
        };
        match ticket.attribute {
            LoadAttribute::Src => {
                progress.finish();
                self.apply_src(ticket.entity, ticket.locator, asset);
            }
            LoadAttribute::Anim => self.apply_anim(ticket.entity, ticket.locator, asset, progress),
        }
    }

    fn apply_src(&mut self, id: EntityId, locator: String, asset: LoadedAsset) {
        // set_src already tore the previous mesh down, so this is normally a no-op
        self.teardown_loaded(id);

        let resolved = resolve_mesh(&mut self.ctx.cache.borrow_mut(), &locator, asset.mesh_group);
        if let Some(discarded) = resolved.discarded {
            self.ctx.loader.release(discarded);
        }
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let mut mesh_group = resolved.mesh_group;
        mesh_group.set_cast_shadows(entity.attributes.cast_shadows);
        mesh_group.update_world_transforms();
        let bone_table = mesh_group.bone_table();
        let bounding_box =
            OrientedBox::from_extent(&mesh_group.local_bounds(), &entity.world.borrow());
        entity.colliders.update_collider(&mesh_group);
        if entity.attributes.debug {
            entity.debug_box = Some(bounding_box.clone());
        }
        log::info!(
            "{:?} loaded '{}' ({} nodes, {} joints)",
            id,
            locator,
            mesh_group.len(),
            bone_table.len()
        );
        entity.loaded = Some(LoadedState {
            locator,
            mesh_group,
            bone_table,
            bounding_box,
            placement: Placement::Direct,
            template: resolved.template,
        });

        self.apply_placement(id);
        self.restore_sockets(id);
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        let has_clip = entity.timeline.clip.is_some();
        let attachment_parent = entity.attachment_parent;
        match attachment_parent {
            _ if has_clip => self.play_animation(id),
            // attached while the mesh was still loading
            Some(parent) => self.join_parent_mixer(parent, id),
            None => self.attach_to_markup_parent(id),
        }
    }

    fn apply_anim(
        &mut self,
        id: EntityId,
        locator: String,
        asset: LoadedAsset,
        progress: Rc<dyn ProgressReporter>,
    ) {
        let LoadedAsset {
            mesh_group,
            animations,
        } = asset;
        self.ctx.loader.release(mesh_group);
        let Some(clip) = animations.into_iter().next() else {
            let err = LoadError::NoAnimationClip { locator };
            log::warn!("{:?}: {}", id, err);
            progress.error(&err);
            return;
        };
        progress.finish();
        self.leave_attachment_parent(id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        log::info!("{:?} loaded clip {} from '{}'", id, clip.name, locator);
        entity.timeline.clip = Some(Rc::new(clip));
        self.play_animation(id);
    }

    /// Switches between direct and instanced placement of a loaded mesh.
    fn apply_placement(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let instanced = entity.attributes.instanced;
        let world = entity.world.clone();
        let Some(loaded) = entity.loaded.as_mut() else {
            return;
        };
        match (loaded.placement, &loaded.template) {
            (Placement::Direct, Some(template)) if instanced => {
                let index = self.ctx.instances.borrow_mut().register_model(
                    &loaded.locator,
                    template.clone(),
                    world,
                );
                log::debug!("{:?} renders '{}' as instance {}", id, loaded.locator, index);
                loaded.placement = Placement::Instanced { index };
            }
            (Placement::Direct, None) if instanced => {
                log::debug!("{:?} cannot instance skinned '{}'", id, loaded.locator);
            }
            (Placement::Instanced { index }, _) if !instanced => {
                self.ctx
                    .instances
                    .borrow_mut()
                    .unregister_model(&loaded.locator, index);
                loaded.placement = Placement::Direct;
            }
            _ => {}
        }
    }

    /// Releases the loaded mesh and everything derived from it.
    fn teardown_loaded(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let Some(loaded) = entity.loaded.take() else {
            return;
        };
        if let Placement::Instanced { index } = loaded.placement {
            self.ctx
                .instances
                .borrow_mut()
                .unregister_model(&loaded.locator, index);
        }
        entity.colliders.remove_colliders();
        entity.debug_box = None;
        // bindings into the old mesh are invalid now
        if let Some(mixer) = entity.timeline.mixer.as_mut() {
            mixer.unbind(id);
        }
        let attachment_parent = entity.attachment_parent;
        let sockets: Vec<EntityId> = entity.sockets.children().collect();
        if let Some(mixer) = attachment_parent
            .and_then(|parent| self.entities.get_mut(&parent))
            .and_then(|parent| parent.timeline.mixer.as_mut())
        {
            mixer.unbind(id);
        }
        self.ctx.loader.release(loaded.mesh_group);
        log::debug!("{:?} released '{}'", id, loaded.locator);
        for child in sockets {
            self.set_link(child, ParentLink::Root);
        }
    }

    /**
     * Recomputes the world transform of `id` and of everything below it.
     *
     * Called whenever something the entity hangs from may have moved: the parent
     * itself, or the joint it is socketed to. Entities taken off the skeleton are
     * left alone until their sockets are restored.
     */
    pub(crate) fn parent_transformed(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        if entity.link == ParentLink::Detached {
            return;
        }
        let anchor = match entity.parent {
            Some(parent) => self.anchor_world(parent, entity.link),
            None => Instance::new(),
        };
        *entity.world.borrow_mut() = &anchor * &entity.local;
        for child in entity.children.clone() {
            self.parent_transformed(child);
        }
    }

    fn anchor_world(&self, parent: EntityId, link: ParentLink) -> Instance {
        let Some(p) = self.entities.get(&parent) else {
            return Instance::new();
        };
        let parent_world = p.world.borrow().clone();
        let joint = joint_node(link).and_then(|node| {
            p.loaded
                .as_ref()
                .and_then(|loaded| loaded.mesh_group.world_transform(node))
        });
        match joint {
            Some(joint) => &parent_world * joint,
            None => parent_world,
        }
    }
}

impl std::fmt::Debug for ModelScene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelScene")
            .field("entities", &self.entities.len())
            .field("pending", &self.pending.len())
            .field("document_time", &self.document_time)
            .finish_non_exhaustive()
    }
}
