//! glTF implementation of [`AssetLoader`].
//!
//! Only what the model lifecycle needs is decoded: the node hierarchy, mesh
//! extents, which nodes are skeleton joints, which meshes are skinned, and the
//! animation channels.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};

use crate::{
    data_structures::{
        instance::Instance,
        mesh_group::{Aabb, MeshGroup, NodeIndex, NodeKind},
    },
    resources::{
        AssetLoader, LoadFuture, LoadedAsset, ProgressFn,
        animation::{AnimationClip, Keyframes, Track},
        load_binary,
    },
};

/// Loads `.gltf`/`.glb` files relative to an asset root.
#[derive(Clone, Debug)]
pub struct GltfLoader {
    root: PathBuf,
}

impl GltfLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for GltfLoader {
    fn default() -> Self {
        Self::new("./assets")
    }
}

impl AssetLoader for GltfLoader {
    fn load(&self, locator: &str, on_progress: ProgressFn) -> LoadFuture {
        let root = self.root.clone();
        let locator = locator.to_string();
        Box::pin(async move {
            on_progress(0, 2);
            let bytes = load_binary(&root, &locator).await?;
            on_progress(1, 2);
            let asset = decode_gltf(&root, &locator, &bytes).await?;
            on_progress(2, 2);
            Ok(asset)
        })
    }
}

fn node_name(node: &::gltf::Node) -> String {
    node.name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node_{}", node.index()))
}

fn add_node(
    group: &mut MeshGroup,
    parent: NodeIndex,
    node: ::gltf::Node,
    joints: &HashSet<usize>,
) {
    let (translation, rotation, scale) = node.transform().decomposed();
    let local = Instance {
        position: translation.into(),
        // glTF stores quaternions as [x, y, z, w]
        rotation: cgmath::Quaternion::new(rotation[3], rotation[0], rotation[1], rotation[2]),
        scale: scale.into(),
    };
    let kind = match node.mesh() {
        Some(mesh) => {
            let mut bounds = Aabb::empty();
            for primitive in mesh.primitives() {
                let bb = primitive.bounding_box();
                bounds.extend(bb.min.into());
                bounds.extend(bb.max.into());
            }
            NodeKind::Mesh {
                bounds,
                skinned: node.skin().is_some(),
                cast_shadows: true,
            }
        }
        None if joints.contains(&node.index()) => NodeKind::Joint,
        None => NodeKind::Container,
    };
    let idx = group.add_node(parent, node_name(&node), kind, local);
    for child in node.children() {
        add_node(group, idx, child, joints);
    }
}

fn read_clips(document: &::gltf::Document, buffers: &[Vec<u8>]) -> Vec<AnimationClip> {
    // BTreeMap keeps clip order stable for files with unnamed animations
    let mut clips: BTreeMap<(usize, String), Vec<Track>> = BTreeMap::new();
    for animation in document.animations() {
        let name = animation
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("animation_{}", animation.index()));
        for channel in animation.channels() {
            let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
            let timestamps: Vec<f32> = reader
                .read_inputs()
                .map(|inputs| inputs.collect())
                .unwrap_or_default();
            let keyframes = match reader.read_outputs() {
                Some(::gltf::animation::util::ReadOutputs::Translations(translations)) => {
                    Keyframes::Translation(translations.map(Into::into).collect())
                }
                Some(::gltf::animation::util::ReadOutputs::Rotations(rotations)) => {
                    Keyframes::Rotation(
                        rotations
                            .into_f32()
                            .map(|q| cgmath::Quaternion::new(q[3], q[0], q[1], q[2]))
                            .collect(),
                    )
                }
                Some(::gltf::animation::util::ReadOutputs::Scales(scales)) => {
                    Keyframes::Scale(scales.map(Into::into).collect())
                }
                // TODO: sample morph target weights once mesh nodes carry morph targets
                Some(::gltf::animation::util::ReadOutputs::MorphTargetWeights(_)) => {
                    Keyframes::Other
                }
                None => {
                    log::warn!("No keyframes found in channel {}", channel.index());
                    Keyframes::Other
                }
            };
            if let Keyframes::Other = keyframes {
                continue;
            }
            clips
                .entry((animation.index(), name.clone()))
                .or_default()
                .push(Track {
                    target: node_name(&channel.target().node()),
                    keyframes,
                    timestamps,
                });
        }
    }
    clips
        .into_iter()
        .map(|((_, name), tracks)| AnimationClip::new(name, tracks))
        .collect()
}

/// Decodes glTF bytes; external buffers are fetched relative to `root`.
pub async fn decode_gltf(root: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<LoadedAsset> {
    let gltf = ::gltf::Gltf::from_slice(bytes)?;

    let mut buffers: Vec<Vec<u8>> = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            ::gltf::buffer::Source::Bin => match gltf.blob.as_deref() {
                Some(blob) => buffers.push(blob.into()),
                None => anyhow::bail!("{} references a binary chunk it does not contain", file_name),
            },
            ::gltf::buffer::Source::Uri(uri) => buffers.push(load_binary(root, uri).await?),
        }
    }

    let joints: HashSet<usize> = gltf
        .skins()
        .flat_map(|skin| skin.joints().map(|joint| joint.index()).collect::<Vec<_>>())
        .collect();

    let mut mesh_group = MeshGroup::new(file_name);
    let scene = gltf.default_scene().or_else(|| gltf.scenes().next());
    if let Some(scene) = scene {
        let root_node = mesh_group.root();
        for node in scene.nodes() {
            add_node(&mut mesh_group, root_node, node, &joints);
        }
    } else {
        log::warn!("{} contains no scene, the model will be empty", file_name);
    }

    let animations = read_clips(&gltf.document, &buffers);
    log::debug!(
        "decoded {}: {} nodes, {} joints, {} clips",
        file_name,
        mesh_group.len(),
        joints.len(),
        animations.len()
    );
    Ok(LoadedAsset {
        mesh_group,
        animations,
    })
}
