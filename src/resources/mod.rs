//! This module contains the asset loading boundary: the [`AssetLoader`] trait model
//! entities load through, and a glTF implementation of it.

use std::{future::Future, path::Path, pin::Pin};

use crate::{data_structures::mesh_group::MeshGroup, resources::animation::AnimationClip};

pub mod animation;
pub mod gltf_loader;

/// What a successful load hands back: the decoded subtree plus any clips it carried.
#[derive(Clone, Debug)]
pub struct LoadedAsset {
    pub mesh_group: MeshGroup,
    pub animations: Vec<AnimationClip>,
}

/// Progress callback: `(loaded, total)` in loader-defined units.
pub type ProgressFn = Box<dyn Fn(usize, usize)>;

pub type LoadFuture = Pin<Box<dyn Future<Output = anyhow::Result<LoadedAsset>>>>;

/// Fetches and decodes assets for model entities.
///
/// Loads run on the same execution context as the scene, so neither the loader
/// nor its futures need to be `Send`.
pub trait AssetLoader {
    fn load(&self, locator: &str, on_progress: ProgressFn) -> LoadFuture;

    /// Releases whatever the decoded group holds on the GPU side.
    ///
    /// Called for superseded results and for copies that lost the canonical slot
    /// in the mesh cache.
    fn release(&self, mesh_group: MeshGroup) {
        log::debug!("releasing mesh group {}", mesh_group.label());
    }
}

#[cfg(target_arch = "wasm32")]
fn format_url(root: &Path, file_name: &str) -> anyhow::Result<reqwest::Url> {
    let window = web_sys::window().ok_or_else(|| anyhow::anyhow!("no window available"))?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| anyhow::anyhow!("window has no origin"))?;
    let base = reqwest::Url::parse(&format!("{}/{}/", origin, root.display()))?;
    Ok(base.join(file_name)?)
}

pub async fn load_binary(root: &Path, file_name: &str) -> anyhow::Result<Vec<u8>> {
    #[cfg(target_arch = "wasm32")]
    let data = {
        let url = format_url(root, file_name)?;
        reqwest::get(url).await?.bytes().await?.to_vec()
    };
    #[cfg(not(target_arch = "wasm32"))]
    let data = tokio::fs::read(root.join(file_name)).await?;

    Ok(data)
}
