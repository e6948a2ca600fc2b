use flow_model::{
    ModelAttributes,
    context::ModelContext,
    model::loading::LoadAttribute,
    resources::gltf_loader::GltfLoader,
    ModelScene,
};
use std::rc::Rc;

use crate::common::test_utils::{Harness, ProgressEvent, rock};

mod common;

#[test]
fn nothing_loads_before_connect() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("rock.glb"));
    assert_eq!(h.loader.total_requests(), 0);

    h.scene.connect(id);
    assert_eq!(h.loader.request_count("rock.glb"), 1);
    assert!(h.scene.is_loading(id, LoadAttribute::Src));

    h.loader.complete("rock.glb", rock("rock.glb"));
    assert_eq!(h.scene.poll_loads(), 1);
    assert_eq!(
        h.scene.loaded_state(id).map(|l| l.locator.as_str()),
        Some("rock.glb")
    );
    assert_eq!(
        h.events(id, LoadAttribute::Src),
        vec![
            ProgressEvent::Start("rock.glb".to_string()),
            ProgressEvent::Progress(1.0),
            ProgressEvent::Finish,
        ]
    );
    assert_eq!(h.collider_counts(id).updates, 1);
}

#[test]
fn only_the_last_started_load_is_applied() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("a.glb"));
    h.scene.connect(id);
    h.scene.set_src(id, "b.glb");
    h.scene.set_src(id, "c.glb");

    // the superseded loads land first, in reverse order
    h.loader.complete("b.glb", rock("b.glb"));
    h.scene.poll_loads();
    assert!(h.scene.loaded_state(id).is_none());

    h.loader.complete("c.glb", rock("c.glb"));
    h.scene.poll_loads();
    h.loader.complete("a.glb", rock("a.glb"));
    h.scene.poll_loads();

    assert_eq!(
        h.scene.loaded_state(id).map(|l| l.locator.as_str()),
        Some("c.glb")
    );
    assert_eq!(h.loader.released(), vec!["b.glb", "a.glb"]);
    assert_eq!(h.scene.pending_loads(), 0);
    let aborts = h
        .events(id, LoadAttribute::Src)
        .into_iter()
        .filter(|e| *e == ProgressEvent::Abort)
        .count();
    assert_eq!(aborts, 2);
}

#[test]
fn superseded_loads_report_no_progress() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("a.glb"));
    h.scene.connect(id);
    h.scene.set_src(id, "b.glb");

    h.loader.complete("a.glb", rock("a.glb"));
    h.scene.poll_loads();
    assert_eq!(
        h.events(id, LoadAttribute::Src),
        vec![
            ProgressEvent::Start("a.glb".to_string()),
            ProgressEvent::Abort,
            ProgressEvent::Start("b.glb".to_string()),
        ]
    );

    h.loader.complete("b.glb", rock("b.glb"));
    h.scene.poll_loads();
    assert_eq!(
        h.events(id, LoadAttribute::Src)[3..],
        [ProgressEvent::Progress(1.0), ProgressEvent::Finish]
    );
}

#[test]
fn changing_src_tears_down_the_old_mesh_right_away() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("a.glb"));
    h.scene.connect(id);
    h.loader.complete("a.glb", rock("a.glb"));
    h.scene.poll_loads();
    assert!(h.scene.get_model(id).is_some());

    h.scene.set_src(id, "b.glb");
    assert!(h.scene.get_model(id).is_none());
    assert!(h.scene.bounding_box(id).is_zero());
    assert_eq!(h.collider_counts(id).removals, 1);
    assert_eq!(h.loader.released(), vec!["a.glb"]);
}

#[test]
fn same_src_does_not_reload() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("a.glb"));
    h.scene.connect(id);
    h.scene.set_src(id, " a.glb ");
    assert_eq!(h.loader.request_count("a.glb"), 1);
}

#[test]
fn failures_are_reported_and_not_retried() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("broken.glb"));
    h.scene.connect(id);
    h.loader.fail("broken.glb", "unexpected end of file");
    h.scene.poll_loads();

    assert!(h.scene.loaded_state(id).is_none());
    let events = h.events(id, LoadAttribute::Src);
    let Some(ProgressEvent::Error(message)) = events.last() else {
        panic!("expected an error event, got {:?}", events);
    };
    assert!(message.contains("broken.glb"));
    assert!(!events.contains(&ProgressEvent::Finish));

    h.scene.on_document_time(16.0);
    h.scene.poll_loads();
    assert_eq!(h.loader.request_count("broken.glb"), 1);
}

#[test]
fn results_arriving_after_disconnect_are_discarded() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("rock.glb"));
    h.scene.connect(id);
    h.scene.disconnect(id);
    h.loader.complete("rock.glb", rock("rock.glb"));
    h.scene.poll_loads();

    assert!(h.scene.loaded_state(id).is_none());
    assert_eq!(h.loader.released(), vec!["rock.glb"]);
    assert!(h.events(id, LoadAttribute::Src).contains(&ProgressEvent::Dispose));

    // reconnecting starts over
    h.scene.connect(id);
    assert_eq!(h.loader.request_count("rock.glb"), 2);
}

#[test]
fn disconnect_releases_everything_loaded() {
    let mut h = Harness::new();
    let id = h.scene.create_entity(ModelAttributes {
        debug: true,
        ..ModelAttributes::default().with_src("rock.glb")
    });
    h.scene.connect(id);
    h.loader.complete("rock.glb", rock("rock.glb"));
    h.scene.poll_loads();
    assert!(h.scene.debug_bounds(id).is_some());

    h.scene.disconnect(id);
    assert!(h.scene.get_model(id).is_none());
    assert!(h.scene.debug_bounds(id).is_none());
    assert_eq!(h.collider_counts(id).removals, 1);
    assert!(!h.scene.is_connected(id));
}

#[test]
fn markup_attributes_are_applied() {
    let mut h = Harness::new();
    let id = h.scene.create_entity(ModelAttributes::default());
    h.scene.connect(id);
    h.scene.set_attribute(id, "src", " rock.glb ").unwrap();
    h.scene.set_attribute(id, "cast-shadows", "false").unwrap();
    assert!(h.scene.set_attribute(id, "anim-loop", "sometimes").is_err());
    h.loader.complete("rock.glb", rock("rock.glb"));
    h.scene.poll_loads();

    let attributes = h.scene.attributes(id).unwrap();
    assert!(!attributes.cast_shadows);
    assert!(attributes.anim_loop);
    let model = h.scene.get_model(id).unwrap();
    assert!(model.nodes().iter().all(|node| !matches!(
        node.kind,
        flow_model::data_structures::mesh_group::NodeKind::Mesh {
            cast_shadows: true,
            ..
        }
    )));
}

#[tokio::test]
async fn settle_waits_for_completions() {
    let mut h = Harness::new();
    let id = h
        .scene
        .create_entity(ModelAttributes::default().with_src("rock.glb"));
    h.scene.connect(id);
    h.loader.complete("rock.glb", rock("rock.glb"));
    h.scene.settle().await;
    assert!(h.scene.loaded_state(id).is_some());
}

#[tokio::test]
async fn missing_gltf_file_is_a_reported_failure() {
    common::test_utils::init_logger();
    let ctx = ModelContext::new(Rc::new(GltfLoader::new("tests/does-not-exist")));
    let mut scene = ModelScene::new(ctx);
    let id = scene.create_entity(ModelAttributes::default().with_src("missing.glb"));
    scene.connect(id);
    scene.settle().await;
    assert!(scene.loaded_state(id).is_none());
    assert!(!scene.is_loading(id, LoadAttribute::Src));
}
