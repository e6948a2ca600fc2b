//! Loads a glTF model (and optionally a separate animation file) into a model
//! scene, plays a few document ticks and logs what the entity ended up with.
//!
//! Usage: `model-inspect <asset-root> <model.glb> [animation.glb]`

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    use std::rc::Rc;

    use flow_model::{
        ModelAttributes, ModelContext, ModelScene, model::loading::LoadAttribute,
        resources::gltf_loader::GltfLoader,
    };

    flow_model::init_logger();

    let mut args = std::env::args().skip(1);
    let (Some(root), Some(src)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: model-inspect <asset-root> <model.glb> [animation.glb]");
    };
    let anim = args.next().unwrap_or_default();

    let ctx = ModelContext::new(Rc::new(GltfLoader::new(root)));
    let mut scene = ModelScene::new(ctx);
    let id = scene.create_entity(ModelAttributes::default().with_src(src).with_anim(anim));
    scene.connect(id);
    scene.settle().await;

    let Some(loaded) = scene.loaded_state(id) else {
        anyhow::bail!("the model did not load, see the log for the reported error");
    };
    let mut joints: Vec<&str> = loaded.bone_table.names().collect();
    joints.sort_unstable();
    log::info!(
        "'{}': {} nodes, {} meshes, skinned: {}, instanceable: {}",
        loaded.locator,
        loaded.mesh_group.len(),
        loaded.mesh_group.mesh_count(),
        loaded.mesh_group.is_skinned(),
        loaded.is_instanceable()
    );
    log::info!("joints: {:?}", joints);
    let bounds = scene.bounding_box(id);
    log::info!(
        "bounding box size {:?} centered at {:?}",
        bounds.size,
        bounds.world_center
    );

    match scene.get_current_animation(id) {
        Some(clip) => {
            log::info!("clip {} lasts {} ms", clip.name, clip.duration_ms());
            let step = (clip.duration_ms() / 4.0).max(1.0);
            for tick in 0..=4 {
                let document_ms = step * tick as f64;
                scene.on_document_time(document_ms);
                log::info!(
                    "document {:.0} ms -> animation {:?} ms",
                    document_ms,
                    scene.animation_time_ms(id)
                );
            }
        }
        None if scene.is_loading(id, LoadAttribute::Anim) => {
            log::warn!("animation is still loading")
        }
        None => log::info!("no animation clip"),
    }
    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn main() {}
