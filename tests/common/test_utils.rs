use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::Rc,
};

use cgmath::Vector3;
use flow_model::{
    ModelScene,
    context::{ColliderHelper, ModelContext, ProgressReporter},
    data_structures::{
        instance::Instance,
        mesh_group::{Aabb, MeshGroup, NodeKind},
    },
    error::LoadError,
    model::{EntityId, instancing::{InstanceBatches, MeshInstanceCache}, loading::LoadAttribute},
    resources::{
        AssetLoader, LoadFuture, LoadedAsset, ProgressFn,
        animation::{AnimationClip, Keyframes, Track},
    },
};
use futures::channel::oneshot;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Asset loader whose loads only finish when the test says so.
#[derive(Default)]
pub struct ManualLoader {
    outstanding: RefCell<HashMap<String, VecDeque<oneshot::Sender<anyhow::Result<LoadedAsset>>>>>,
    requests: RefCell<Vec<String>>,
    released: RefCell<Vec<String>>,
}

impl ManualLoader {
    /// Completes the oldest outstanding load of `locator`.
    pub fn complete(&self, locator: &str, asset: LoadedAsset) {
        self.resolve(locator, Ok(asset));
    }

    pub fn fail(&self, locator: &str, reason: &str) {
        self.resolve(locator, Err(anyhow::anyhow!("{}", reason.to_string())));
    }

    fn resolve(&self, locator: &str, result: anyhow::Result<LoadedAsset>) {
        let sender = self
            .outstanding
            .borrow_mut()
            .get_mut(locator)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| panic!("no outstanding load of {}", locator));
        assert!(sender.send(result).is_ok(), "load of {} was dropped", locator);
    }

    pub fn request_count(&self, locator: &str) -> usize {
        self.requests.borrow().iter().filter(|r| *r == locator).count()
    }

    pub fn total_requests(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.borrow().clone()
    }
}

impl AssetLoader for ManualLoader {
    fn load(&self, locator: &str, on_progress: ProgressFn) -> LoadFuture {
        let (tx, rx) = oneshot::channel();
        self.outstanding
            .borrow_mut()
            .entry(locator.to_string())
            .or_default()
            .push_back(tx);
        self.requests.borrow_mut().push(locator.to_string());
        Box::pin(async move {
            let result = rx
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("load was abandoned")));
            on_progress(1, 1);
            result
        })
    }

    fn release(&self, mesh_group: MeshGroup) {
        self.released.borrow_mut().push(mesh_group.label().to_string());
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    Start(String),
    Progress(f32),
    Finish,
    Error(String),
    Abort,
    Dispose,
}

pub type ProgressLog = Rc<RefCell<Vec<(EntityId, LoadAttribute, ProgressEvent)>>>;

pub struct RecordingProgress {
    entity: EntityId,
    attribute: LoadAttribute,
    log: ProgressLog,
}

impl RecordingProgress {
    fn record(&self, event: ProgressEvent) {
        self.log
            .borrow_mut()
            .push((self.entity, self.attribute, event));
    }
}

impl ProgressReporter for RecordingProgress {
    fn start(&self, _context: &str, locator: &str) {
        self.record(ProgressEvent::Start(locator.to_string()));
    }

    fn set_progress(&self, fraction: f32) {
        self.record(ProgressEvent::Progress(fraction));
    }

    fn finish(&self) {
        self.record(ProgressEvent::Finish);
    }

    fn error(&self, err: &LoadError) {
        self.record(ProgressEvent::Error(err.to_string()));
    }

    fn abort_if_loading(&self) {
        self.record(ProgressEvent::Abort);
    }

    fn dispose(&self) {
        self.record(ProgressEvent::Dispose);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColliderCounts {
    pub updates: usize,
    pub removals: usize,
}

pub type ColliderLog = Rc<RefCell<HashMap<EntityId, ColliderCounts>>>;

pub struct RecordingColliders {
    entity: EntityId,
    log: ColliderLog,
}

impl ColliderHelper for RecordingColliders {
    fn update_collider(&mut self, _: &MeshGroup) {
        self.log.borrow_mut().entry(self.entity).or_default().updates += 1;
    }

    fn remove_colliders(&mut self) {
        self.log.borrow_mut().entry(self.entity).or_default().removals += 1;
    }
}

/// A scene wired to recording doubles, with a cache of its own.
pub struct Harness {
    pub scene: ModelScene,
    pub loader: Rc<ManualLoader>,
    pub progress: ProgressLog,
    pub colliders: ColliderLog,
    pub instances: Rc<RefCell<InstanceBatches>>,
    pub cache: Rc<RefCell<MeshInstanceCache>>,
}

impl Harness {
    pub fn new() -> Self {
        init_logger();
        let loader = Rc::new(ManualLoader::default());
        let progress: ProgressLog = Rc::default();
        let colliders: ColliderLog = Rc::default();
        let instances = Rc::new(RefCell::new(InstanceBatches::new()));
        let cache = Rc::new(RefCell::new(MeshInstanceCache::new()));

        let progress_log = progress.clone();
        let collider_log = colliders.clone();
        let ctx = ModelContext::new(loader.clone())
            .with_cache(cache.clone())
            .with_instances(instances.clone())
            .with_progress(move |entity, attribute| {
                Rc::new(RecordingProgress {
                    entity,
                    attribute,
                    log: progress_log.clone(),
                }) as Rc<dyn ProgressReporter>
            })
            .with_colliders(move |entity| {
                Box::new(RecordingColliders {
                    entity,
                    log: collider_log.clone(),
                }) as Box<dyn ColliderHelper>
            });
        Self {
            scene: ModelScene::new(ctx),
            loader,
            progress,
            colliders,
            instances,
            cache,
        }
    }

    pub fn events(&self, entity: EntityId, attribute: LoadAttribute) -> Vec<ProgressEvent> {
        self.progress
            .borrow()
            .iter()
            .filter(|(e, a, _)| *e == entity && *a == attribute)
            .map(|(_, _, event)| event.clone())
            .collect()
    }

    pub fn collider_counts(&self, entity: EntityId) -> ColliderCounts {
        self.colliders
            .borrow()
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }
}

fn mesh(bounds: Aabb, skinned: bool) -> NodeKind {
    NodeKind::Mesh {
        bounds,
        skinned,
        cast_shadows: true,
    }
}

/// Skinned figure: `spine` at (0, 1, 0) with a `hand` joint 0.5 to its right.
pub fn character(label: &str) -> LoadedAsset {
    let mut group = MeshGroup::new(label);
    let root = group.root();
    let armature = group.add_node(root, "armature", NodeKind::Container, Instance::new());
    let spine = group.add_node(
        armature,
        "spine",
        NodeKind::Joint,
        Instance::from(Vector3::new(0.0, 1.0, 0.0)),
    );
    group.add_node(
        spine,
        "hand",
        NodeKind::Joint,
        Instance::from(Vector3::new(0.5, 0.0, 0.0)),
    );
    group.add_node(
        root,
        "body",
        mesh(Aabb::new([-0.5, 0.0, -0.5], [0.5, 2.0, 0.5]), true),
        Instance::new(),
    );
    LoadedAsset {
        mesh_group: group,
        animations: Vec::new(),
    }
}

/// Skinned figure with a `head` joint but no `hand`.
pub fn robot(label: &str) -> LoadedAsset {
    let mut group = MeshGroup::new(label);
    let root = group.root();
    group.add_node(
        root,
        "head",
        NodeKind::Joint,
        Instance::from(Vector3::new(0.0, 3.0, 0.0)),
    );
    group.add_node(
        root,
        "chassis",
        mesh(Aabb::new([-1.0, 0.0, -1.0], [1.0, 3.0, 1.0]), true),
        Instance::new(),
    );
    LoadedAsset {
        mesh_group: group,
        animations: Vec::new(),
    }
}

/// Static unit cube resting on the ground.
pub fn rock(label: &str) -> LoadedAsset {
    let mut group = MeshGroup::new(label);
    let root = group.root();
    group.add_node(
        root,
        "rock",
        mesh(Aabb::new([-0.5, 0.0, -0.5], [0.5, 1.0, 0.5]), false),
        Instance::new(),
    );
    LoadedAsset {
        mesh_group: group,
        animations: Vec::new(),
    }
}

/// Static prop that happens to have a `hand` node of its own.
pub fn glove(label: &str) -> LoadedAsset {
    let mut group = MeshGroup::new(label);
    let root = group.root();
    group.add_node(
        root,
        "hand",
        mesh(Aabb::new([-0.1, -0.1, -0.1], [0.1, 0.1, 0.1]), false),
        Instance::new(),
    );
    LoadedAsset {
        mesh_group: group,
        animations: Vec::new(),
    }
}

/// Moves `hand` from x = 0 to x = 2 over two seconds.
pub fn wave_clip() -> AnimationClip {
    AnimationClip::new(
        "wave",
        vec![Track {
            target: "hand".to_string(),
            keyframes: Keyframes::Translation(vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0),
            ]),
            timestamps: vec![0.0, 2.0],
        }],
    )
}

pub fn animation(label: &str) -> LoadedAsset {
    LoadedAsset {
        mesh_group: MeshGroup::new(label),
        animations: vec![wave_clip()],
    }
}

pub fn assert_close(actual: Vector3<f32>, expected: Vector3<f32>) {
    let d = actual - expected;
    assert!(
        d.x.abs() < 1e-4 && d.y.abs() < 1e-4 && d.z.abs() < 1e-4,
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}
