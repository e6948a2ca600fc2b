//! Loaded mesh subtrees and their joint lookup.
//!
//! A [`MeshGroup`] is the scene-graph subtree produced by one asset load. Nodes
//! live in an arena and refer to each other by [`NodeIndex`]; parents are always
//! stored before their children so world transforms can be refreshed in a single
//! forward pass. A [`BoneTable`] maps joint names to indices into one specific
//! group and is thrown away together with it.

use std::collections::HashMap;

use cgmath::{EuclideanSpace, Point3, Vector3};

use crate::data_structures::instance::Instance;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

/// Axis-aligned extent. An empty box has `min > max` on every axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, point: Point3<f32>) {
        self.min = Point3::new(
            self.min.x.min(point.x),
            self.min.y.min(point.y),
            self.min.z.min(point.z),
        );
        self.max = Point3::new(
            self.max.x.max(point.x),
            self.max.y.max(point.y),
            self.max.z.max(point.z),
        );
    }

    pub fn corners(&self) -> [Point3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }

    pub fn size(&self) -> Vector3<f32> {
        if self.is_empty() {
            return Vector3::new(0.0, 0.0, 0.0);
        }
        self.max - self.min
    }

    pub fn center(&self) -> Point3<f32> {
        if self.is_empty() {
            return Point3::origin();
        }
        self.min.midpoint(self.max)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Container,
    Joint,
    Mesh {
        bounds: Aabb,
        skinned: bool,
        cast_shadows: bool,
    },
}

#[derive(Clone, Debug)]
pub struct MeshNode {
    pub name: String,
    pub parent: Option<NodeIndex>,
    pub children: Vec<NodeIndex>,
    pub kind: NodeKind,
    bind: Instance,
    local: Instance,
    world: Instance,
}

impl MeshNode {
    pub fn local_transform(&self) -> &Instance {
        &self.local
    }

    /// Transform relative to the group root, valid after [`MeshGroup::update_world_transforms`].
    pub fn world_transform(&self) -> &Instance {
        &self.world
    }

    pub fn is_joint(&self) -> bool {
        matches!(self.kind, NodeKind::Joint)
    }
}

#[derive(Clone, Debug)]
pub struct MeshGroup {
    label: String,
    nodes: Vec<MeshNode>,
}

impl MeshGroup {
    /// Creates a group holding only its root container.
    pub fn new(label: impl Into<String>) -> Self {
        let root = MeshNode {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Container,
            bind: Instance::new(),
            local: Instance::new(),
            world: Instance::new(),
        };
        Self {
            label: label.into(),
            nodes: vec![root],
        }
    }

    /// The locator (or file name) this group was decoded from.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> NodeIndex {
        NodeIndex(0)
    }

    /**
     * Appends a node below `parent`. The transform becomes both the bind pose and
     * the current local transform.
     */
    pub fn add_node(
        &mut self,
        parent: NodeIndex,
        name: impl Into<String>,
        kind: NodeKind,
        local: Instance,
    ) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        let parent_world = self
            .nodes
            .get(parent.0)
            .map(|p| p.world.clone())
            .unwrap_or_default();
        let world = &parent_world * &local;
        self.nodes.push(MeshNode {
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            kind,
            bind: local.clone(),
            local,
            world,
        });
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.push(idx);
        }
        idx
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&MeshNode> {
        self.nodes.get(idx.0)
    }

    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(NodeIndex)
    }

    /// True when any sub-mesh is deformed by a skeleton.
    pub fn is_skinned(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node.kind, NodeKind::Mesh { skinned: true, .. }))
    }

    pub fn mesh_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::Mesh { .. }))
            .count()
    }

    pub fn bone_table(&self) -> BoneTable {
        let mut bones = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.is_joint() {
                // first joint with a given name wins, like a depth-first lookup would
                bones.entry(node.name.clone()).or_insert(NodeIndex(idx));
            }
        }
        BoneTable { bones }
    }

    pub fn set_local_transform(&mut self, idx: NodeIndex, instance: Instance) -> bool {
        match self.nodes.get_mut(idx.0) {
            Some(node) => {
                node.local = instance;
                true
            }
            None => {
                log::warn!(
                    "Node {} is out of bounds for mesh group {} with {} nodes.",
                    idx.0,
                    self.label,
                    self.nodes.len()
                );
                false
            }
        }
    }

    pub fn set_local_transform_all(&mut self, mutation: &mut dyn FnMut(&mut Instance)) {
        self.nodes.iter_mut().for_each(|node| mutation(&mut node.local));
    }

    pub fn reset_to_bind_pose(&mut self) {
        self.nodes
            .iter_mut()
            .for_each(|node| node.local = node.bind.clone());
        self.update_world_transforms();
    }

    /// Recomputes every node's transform relative to the group root.
    pub fn update_world_transforms(&mut self) {
        for i in 0..self.nodes.len() {
            let world = match self.nodes[i].parent {
                Some(parent) if parent.0 < i => &self.nodes[parent.0].world * &self.nodes[i].local,
                _ => self.nodes[i].local.clone(),
            };
            self.nodes[i].world = world;
        }
    }

    pub fn world_transform(&self, idx: NodeIndex) -> Option<&Instance> {
        self.nodes.get(idx.0).map(|node| &node.world)
    }

    /// Extent of every mesh in root space, using the current world transforms.
    pub fn local_bounds(&self) -> Aabb {
        let mut extent = Aabb::empty();
        for node in &self.nodes {
            if let NodeKind::Mesh { bounds, .. } = &node.kind {
                if bounds.is_empty() {
                    continue;
                }
                for corner in bounds.corners() {
                    extent.extend(node.world.transform_point(corner));
                }
            }
        }
        extent
    }

    pub fn set_cast_shadows(&mut self, enabled: bool) {
        for node in self.nodes.iter_mut() {
            if let NodeKind::Mesh { cast_shadows, .. } = &mut node.kind {
                *cast_shadows = enabled;
            }
        }
    }
}

/// Joint name to node index, valid only for the group it was built from.
#[derive(Clone, Debug, Default)]
pub struct BoneTable {
    bones: HashMap<String, NodeIndex>,
}

impl BoneTable {
    pub fn resolve(&self, name: &str) -> Option<NodeIndex> {
        self.bones.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bones.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Deg, Quaternion, Rotation3};

    use super::*;

    fn arm() -> (MeshGroup, NodeIndex, NodeIndex) {
        let mut group = MeshGroup::new("arm.glb");
        let root = group.root();
        let shoulder = group.add_node(
            root,
            "shoulder",
            NodeKind::Joint,
            Instance::from(Vector3::new(0.0, 1.0, 0.0)),
        );
        let hand = group.add_node(
            shoulder,
            "hand",
            NodeKind::Joint,
            Instance::from(Vector3::new(1.0, 0.0, 0.0)),
        );
        group.add_node(
            root,
            "skin",
            NodeKind::Mesh {
                bounds: Aabb::new([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0]),
                skinned: true,
                cast_shadows: true,
            },
            Instance::new(),
        );
        (group, shoulder, hand)
    }

    #[test]
    fn world_transforms_follow_parent_rotation() {
        let (mut group, shoulder, hand) = arm();
        assert_eq!(
            group.world_transform(hand).map(|w| w.position),
            Some(Vector3::new(1.0, 1.0, 0.0))
        );
        group.set_local_transform(
            shoulder,
            Instance {
                position: Vector3::new(0.0, 1.0, 0.0),
                rotation: Quaternion::from_angle_z(Deg(90.0)),
                scale: Vector3::new(1.0, 1.0, 1.0),
            },
        );
        group.update_world_transforms();
        let hand_world = group.world_transform(hand).unwrap().position;
        assert!((hand_world - Vector3::new(0.0, 2.0, 0.0)).x.abs() < 1e-5);
        assert!((hand_world - Vector3::new(0.0, 2.0, 0.0)).y.abs() < 1e-5);

        group.reset_to_bind_pose();
        assert_eq!(
            group.world_transform(hand).map(|w| w.position),
            Some(Vector3::new(1.0, 1.0, 0.0))
        );
    }

    #[test]
    fn bone_table_only_contains_joints() {
        let (group, _, hand) = arm();
        let bones = group.bone_table();
        assert_eq!(bones.len(), 2);
        assert_eq!(bones.resolve("hand"), Some(hand));
        assert_eq!(bones.resolve("skin"), None);
        assert!(group.is_skinned());
    }

    #[test]
    fn local_bounds_include_node_offsets() {
        let mut group = MeshGroup::new("crate.glb");
        let root = group.root();
        group.add_node(
            root,
            "box",
            NodeKind::Mesh {
                bounds: Aabb::new([-0.5, -0.5, -0.5], [0.5, 0.5, 0.5]),
                skinned: false,
                cast_shadows: true,
            },
            Instance::from(Vector3::new(0.0, 0.5, 0.0)),
        );
        let extent = group.local_bounds();
        assert_eq!(extent.size(), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(extent.center(), Point3::new(0.0, 0.5, 0.0));
        assert!(!group.is_skinned());
    }

    #[test]
    fn empty_group_has_empty_bounds() {
        let group = MeshGroup::new("nothing");
        assert!(group.local_bounds().is_empty());
        assert_eq!(group.local_bounds().size(), Vector3::new(0.0, 0.0, 0.0));
    }
}
