//! Shared animation evaluator for an entity and its attachments.
//!
//! A mixer binds every track of one clip to nodes with the track's target name,
//! in every mesh group handed to [`AnimationMixer::bind`]. Evaluation returns the
//! sampled [`Pose`]s; writing them into the meshes is left to the scene, which
//! owns the meshes.

use std::rc::Rc;

use crate::{
    data_structures::mesh_group::{MeshGroup, NodeIndex},
    model::EntityId,
    resources::animation::{AnimationClip, Sample},
};

#[derive(Clone, Copy, Debug)]
struct Binding {
    entity: EntityId,
    node: NodeIndex,
    track: usize,
}

/// One sampled value for one node of one entity's mesh.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub entity: EntityId,
    pub node: NodeIndex,
    pub sample: Sample,
}

#[derive(Debug)]
pub struct AnimationMixer {
    clip: Rc<AnimationClip>,
    looping: bool,
    bindings: Vec<Binding>,
    roots: Vec<EntityId>,
    last_time_ms: Option<f64>,
}

impl AnimationMixer {
    pub fn new(clip: Rc<AnimationClip>, looping: bool) -> Self {
        Self {
            clip,
            looping,
            bindings: Vec::new(),
            roots: Vec::new(),
            last_time_ms: None,
        }
    }

    pub fn clip(&self) -> &Rc<AnimationClip> {
        &self.clip
    }

    /// Binds the clip's tracks to matching nodes of `entity`'s mesh.
    ///
    /// Returns the number of tracks that found a target.
    pub fn bind(&mut self, entity: EntityId, mesh_group: &MeshGroup) -> usize {
        self.unbind(entity);
        let before = self.bindings.len();
        for (track, t) in self.clip.tracks.iter().enumerate() {
            if let Some(node) = mesh_group.find_by_name(&t.target) {
                self.bindings.push(Binding {
                    entity,
                    node,
                    track,
                });
            }
        }
        self.roots.push(entity);
        self.last_time_ms = None;
        let bound = self.bindings.len() - before;
        log::debug!(
            "clip {} bound {} of {} tracks to {}",
            self.clip.name,
            bound,
            self.clip.tracks.len(),
            mesh_group.label()
        );
        bound
    }

    pub fn unbind(&mut self, entity: EntityId) {
        self.bindings.retain(|binding| binding.entity != entity);
        self.roots.retain(|root| *root != entity);
    }

    /// Entities whose meshes this mixer animates.
    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    pub fn set_looping(&mut self, looping: bool) {
        if self.looping != looping {
            self.looping = looping;
            self.last_time_ms = None;
        }
    }

    /// Evaluates the clip at `time_ms` unless that is the time evaluated last.
    pub fn set_time(&mut self, time_ms: f64) -> Option<Vec<Pose>> {
        if self.last_time_ms == Some(time_ms) {
            return None;
        }
        Some(self.force_evaluate(time_ms))
    }

    /// Evaluates the clip at `time_ms` even if nothing changed since the last call.
    pub fn force_evaluate(&mut self, time_ms: f64) -> Vec<Pose> {
        self.last_time_ms = Some(time_ms);
        // wrap in milliseconds, keyframes only need f32 seconds afterwards
        let duration_ms = self.clip.duration_ms();
        let clip_ms = if self.looping && duration_ms > 0.0 {
            time_ms.rem_euclid(duration_ms)
        } else {
            time_ms.clamp(0.0, duration_ms)
        };
        let t = (clip_ms / 1000.0) as f32;
        self.bindings
            .iter()
            .filter_map(|binding| {
                let sample = self.clip.tracks.get(binding.track)?.sample(t)?;
                Some(Pose {
                    entity: binding.entity,
                    node: binding.node,
                    sample,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use cgmath::Vector3;

    use super::*;
    use crate::{
        data_structures::{instance::Instance, mesh_group::NodeKind},
        resources::animation::{Keyframes, Track},
    };

    fn slide() -> Rc<AnimationClip> {
        Rc::new(AnimationClip::new(
            "slide",
            vec![Track {
                target: "hand".to_string(),
                keyframes: Keyframes::Translation(vec![
                    Vector3::new(0.0, 0.0, 0.0),
                    Vector3::new(2.0, 0.0, 0.0),
                ]),
                timestamps: vec![0.0, 2.0],
            }],
        ))
    }

    fn with_hand(label: &str) -> MeshGroup {
        let mut group = MeshGroup::new(label);
        let root = group.root();
        group.add_node(root, "hand", NodeKind::Joint, Instance::new());
        group
    }

    #[test]
    fn binds_by_name_across_meshes() {
        let mut mixer = AnimationMixer::new(slide(), true);
        assert_eq!(mixer.bind(EntityId(1), &with_hand("a.glb")), 1);
        assert_eq!(mixer.bind(EntityId(2), &with_hand("b.glb")), 1);
        assert_eq!(mixer.bind(EntityId(3), &MeshGroup::new("empty")), 0);
        assert_eq!(mixer.roots(), &[EntityId(1), EntityId(2), EntityId(3)]);
        assert_eq!(mixer.force_evaluate(1000.0).len(), 2);

        mixer.unbind(EntityId(1));
        let poses = mixer.force_evaluate(1000.0);
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].entity, EntityId(2));
    }

    #[test]
    fn repeated_time_is_skipped_unless_forced() {
        let mut mixer = AnimationMixer::new(slide(), true);
        mixer.bind(EntityId(1), &with_hand("a.glb"));
        assert!(mixer.set_time(500.0).is_some());
        assert!(mixer.set_time(500.0).is_none());
        assert_eq!(mixer.force_evaluate(500.0).len(), 1);
    }

    #[test]
    fn looping_wraps_and_non_looping_holds() {
        let mut mixer = AnimationMixer::new(slide(), true);
        mixer.bind(EntityId(1), &with_hand("a.glb"));
        assert_eq!(
            mixer.force_evaluate(3000.0)[0].sample,
            Sample::Translation(Vector3::new(1.0, 0.0, 0.0))
        );
        mixer.set_looping(false);
        assert_eq!(
            mixer.force_evaluate(3000.0)[0].sample,
            Sample::Translation(Vector3::new(2.0, 0.0, 0.0))
        );
    }

    #[test]
    fn late_document_times_wrap_without_losing_precision() {
        let mut mixer = AnimationMixer::new(slide(), true);
        mixer.bind(EntityId(1), &with_hand("a.glb"));
        // ten days of document time plus half a second
        let time_ms = 864_000_000.0 + 500.0;
        assert_eq!(
            mixer.force_evaluate(time_ms)[0].sample,
            Sample::Translation(Vector3::new(0.5, 0.0, 0.0))
        );
    }
}
