//! Document time to clip time.
//!
//! Each entity with a clip runs a small state machine ([`TimelineState`]). While
//! the clip is active every document tick is mapped to an animation time with
//! [`animation_time_ms`] and pushed into the entity's mixer.

use std::rc::Rc;

use crate::{
    model::{EntityId, mixer::{AnimationMixer, Pose}, scene::ModelScene},
    resources::animation::AnimationClip,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineState {
    NoClip,
    ClipActive,
    ClipSuspended,
}

/**
 * Maps a document time to an animation time, all in milliseconds.
 *
 * Before `start_ms` the clip sits at its start. After `pause_ms` time stands
 * still at `pause_ms - start_ms`. Without looping the result never exceeds the
 * clip duration, so the last pose is held instead of wrapping.
 */
pub fn animation_time_ms(
    document_ms: f64,
    start_ms: f64,
    pause_ms: Option<f64>,
    looping: bool,
    duration_ms: f64,
) -> f64 {
    let mut time = (document_ms - start_ms).max(0.0);
    if let Some(pause) = pause_ms {
        if document_ms > pause {
            time = (pause - start_ms).max(0.0);
        }
    }
    if !looping {
        time = time.min(duration_ms);
    }
    time
}

/// Live playback handle of the current clip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationAction {
    pub time_ms: f64,
}

#[derive(Debug, Default)]
pub struct AnimationTimeline {
    pub clip: Option<Rc<AnimationClip>>,
    pub action: Option<AnimationAction>,
    pub mixer: Option<AnimationMixer>,
    /// Time of the last evaluation; a re-created action resumes from here.
    pub last_evaluated_ms: f64,
}

impl AnimationTimeline {
    pub fn state(&self) -> TimelineState {
        match (&self.clip, &self.action) {
            (None, _) => TimelineState::NoClip,
            (Some(_), Some(_)) => TimelineState::ClipActive,
            (Some(_), None) => TimelineState::ClipSuspended,
        }
    }
}

impl ModelScene {
    pub fn set_anim_enabled(&mut self, id: EntityId, enabled: bool) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.attributes.anim_enabled = enabled;
        if enabled {
            if entity.timeline.clip.is_some() && entity.timeline.action.is_none() {
                self.play_animation(id);
            }
        } else {
            self.stop_mixer(id);
        }
    }

    pub fn set_anim_loop(&mut self, id: EntityId, looping: bool) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.attributes.anim_loop = looping;
        if let Some(mixer) = entity.timeline.mixer.as_mut() {
            mixer.set_looping(looping);
        }
        self.update_animation_time(id, false);
    }

    pub fn set_anim_start_time(&mut self, id: EntityId, start_ms: f64) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.attributes.anim_start_time = start_ms;
            self.update_animation_time(id, false);
        }
    }

    pub fn set_anim_pause_time(&mut self, id: EntityId, pause_ms: Option<f64>) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.attributes.anim_pause_time = pause_ms;
            self.update_animation_time(id, false);
        }
    }

    /// Document clock tick. Every connected entity is subscribed.
    pub fn on_document_time(&mut self, document_ms: f64) {
        self.document_time = Some(document_ms);
        let subscribers: Vec<EntityId> = self.clock_subscribers.iter().copied().collect();
        for id in subscribers {
            self.update_animation_time(id, false);
        }
    }

    pub fn document_time(&self) -> Option<f64> {
        self.document_time
    }

    pub fn timeline_state(&self, id: EntityId) -> TimelineState {
        self.entities
            .get(&id)
            .map(|entity| entity.timeline.state())
            .unwrap_or(TimelineState::NoClip)
    }

    /// Time of the active playback handle, if the clip is playing.
    pub fn animation_time_ms(&self, id: EntityId) -> Option<f64> {
        self.entities
            .get(&id)?
            .timeline
            .action
            .map(|action| action.time_ms)
    }

    pub fn get_current_animation(&self, id: EntityId) -> Option<Rc<AnimationClip>> {
        self.entities.get(&id)?.timeline.clip.clone()
    }

    /**
     * Rebuilds the mixer over this entity's mesh and every attachment's mesh and
     * starts playback at the last evaluated time.
     *
     * Socket children of all members are taken off the skeleton while the mixer
     * is rebuilt and put back afterwards.
     */
    pub(crate) fn play_animation(&mut self, id: EntityId) {
        self.stop_mixer(id);
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        let Some(clip) = entity.timeline.clip.clone() else {
            return;
        };
        if !entity.attributes.anim_enabled {
            log::debug!("animation of {:?} is disabled, not playing {}", id, clip.name);
            return;
        }
        let looping = entity.attributes.anim_loop;
        let members: Vec<EntityId> = std::iter::once(id)
            .chain(entity.attachments.iter())
            .collect();

        for member in &members {
            self.disable_sockets(*member);
        }
        let mut mixer = AnimationMixer::new(clip.clone(), looping);
        for member in &members {
            if let Some(loaded) = self.entities.get(member).and_then(|m| m.loaded.as_ref()) {
                mixer.bind(*member, &loaded.mesh_group);
            }
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.timeline.action = Some(AnimationAction {
                time_ms: entity.timeline.last_evaluated_ms,
            });
            entity.timeline.mixer = Some(mixer);
        }
        for member in &members {
            self.restore_sockets(*member);
        }
        log::info!("entity {:?} plays {} over {} meshes", id, clip.name, members.len());
        self.update_animation_time(id, true);
    }

    /// Tears the mixer down and returns every animated mesh to its bind pose.
    pub(crate) fn stop_mixer(&mut self, id: EntityId) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        entity.timeline.action = None;
        let Some(mixer) = entity.timeline.mixer.take() else {
            return;
        };
        for root in mixer.roots() {
            if let Some(loaded) = self.entities.get_mut(root).and_then(|e| e.loaded.as_mut()) {
                loaded.mesh_group.reset_to_bind_pose();
            }
        }
        for root in mixer.roots() {
            self.notify_socket_children(*root);
        }
    }

    /// Drops the clip together with its playback.
    pub(crate) fn clear_animation(&mut self, id: EntityId) {
        self.stop_mixer(id);
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.timeline.clip = None;
            entity.timeline.last_evaluated_ms = 0.0;
        }
    }

    /**
     * Pushes the current document time through the entity's mixer.
     *
     * `force` evaluates even when the time did not change, which is needed after
     * the set of animated meshes changed. Socket children of the entity and of
     * its attachments are refreshed after every update.
     */
    pub(crate) fn update_animation_time(&mut self, id: EntityId, force: bool) {
        let document_time = self.document_time;
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let attributes = &entity.attributes;
        let timeline = &mut entity.timeline;
        let (Some(clip), Some(action)) = (timeline.clip.as_ref(), timeline.action.as_mut()) else {
            return;
        };
        let time_ms = match document_time {
            Some(document_ms) => animation_time_ms(
                document_ms,
                attributes.anim_start_time,
                attributes.anim_pause_time,
                attributes.anim_loop,
                clip.duration_ms(),
            ),
            None => action.time_ms,
        };
        action.time_ms = time_ms;
        timeline.last_evaluated_ms = time_ms;

        let mut roots = Vec::new();
        let mut poses: Option<Vec<Pose>> = None;
        if let Some(mixer) = timeline.mixer.as_mut() {
            poses = if force {
                Some(mixer.force_evaluate(time_ms))
            } else {
                mixer.set_time(time_ms)
            };
            roots = mixer.roots().to_vec();
        }
        let attachments: Vec<EntityId> = entity.attachments.iter().collect();

        if let Some(poses) = poses {
            self.apply_poses(&poses);
            for root in &roots {
                if let Some(loaded) = self.entities.get_mut(root).and_then(|e| e.loaded.as_mut()) {
                    loaded.mesh_group.update_world_transforms();
                }
            }
        }
        self.notify_socket_children(id);
        for attachment in attachments {
            self.notify_socket_children(attachment);
        }
    }

    fn apply_poses(&mut self, poses: &[Pose]) {
        for pose in poses {
            let Some(loaded) = self
                .entities
                .get_mut(&pose.entity)
                .and_then(|e| e.loaded.as_mut())
            else {
                continue;
            };
            let Some(mut local) = loaded
                .mesh_group
                .node(pose.node)
                .map(|node| node.local_transform().clone())
            else {
                continue;
            };
            pose.sample.apply(&mut local);
            loaded.mesh_group.set_local_transform(pose.node, local);
        }
    }
}
