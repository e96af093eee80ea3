//! Ready-made hierarchies, updaters, and manager bundles.

use parking_lot::Mutex;
use scenebridge_core::{
    Capabilities, CopySpecs, CrossPath, MemoryUndoSink, SyncManager, Updater, UpdaterContext,
    UpdaterRegistry, UndoSink,
};
use scenebridge_scene::SceneGraph;
use scenebridge_stage::{Layer, Stage, StagePath, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Builds the canonical test stage:
///
/// ```text
/// /World            (Xform)
/// /World/Box        (Cube)   size = 2.0, label = "crate"
/// /World/Box/Lid    (Cube)   open = false
/// /World/Ball       (Sphere)
/// ```
pub fn test_stage() -> Arc<Stage> {
    let stage = Arc::new(Stage::in_memory("testkit"));
    let path = |text: &str| StagePath::parse(text).expect("fixture path");
    stage.define_prim(&path("/World"), "Xform").expect("fixture prim");
    stage.define_prim(&path("/World/Box"), "Cube").expect("fixture prim");
    stage
        .set_field(&path("/World/Box"), "size", Value::Float(2.0))
        .expect("fixture field");
    stage
        .set_field(&path("/World/Box"), "label", Value::from("crate"))
        .expect("fixture field");
    stage
        .define_prim(&path("/World/Box/Lid"), "Cube")
        .expect("fixture prim");
    stage
        .set_field(&path("/World/Box/Lid"), "open", Value::Bool(false))
        .expect("fixture field");
    stage.define_prim(&path("/World/Ball"), "Sphere").expect("fixture prim");
    stage
}

/// Counters shared by every [`RecordingUpdater`] a factory builds.
#[derive(Debug, Default)]
pub struct UpdaterCounters {
    /// `edit_as_scene` invocations.
    pub edits: AtomicUsize,
    /// `discard_edits` invocations.
    pub discards: AtomicUsize,
    /// `push_copy_specs` invocations.
    pub copies: AtomicUsize,
    /// `push_end` invocations.
    pub ends: AtomicUsize,
}

/// An updater that counts its invocations and records the destination
/// paths its copy step visited, behaving generically otherwise.
pub struct RecordingUpdater {
    counters: Arc<UpdaterCounters>,
    visited: Arc<Mutex<Vec<String>>>,
}

impl Updater for RecordingUpdater {
    fn edit_as_scene(&mut self, _context: &UpdaterContext) -> bool {
        self.counters.edits.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn discard_edits(&mut self, _context: &UpdaterContext) -> bool {
        self.counters.discards.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn push_copy_specs(
        &mut self,
        src_layer: &Layer,
        src_path: &StagePath,
        dst_stage: &Stage,
        dst_path: &StagePath,
    ) -> CopySpecs {
        self.counters.copies.fetch_add(1, Ordering::SeqCst);
        self.visited.lock().push(dst_path.to_string());
        match dst_stage.copy_prim_from_layer(src_layer, src_path, dst_path) {
            Ok(()) => CopySpecs::Continue,
            Err(_) => CopySpecs::Failed,
        }
    }

    fn push_end(&mut self, _context: &UpdaterContext) -> bool {
        self.counters.ends.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// A registry with a [`RecordingUpdater`] registered for each given type
/// name, plus the shared counters and visited-path log.
pub fn recording_registry(
    type_names: &[&str],
) -> (Arc<UpdaterRegistry>, Arc<UpdaterCounters>, Arc<Mutex<Vec<String>>>) {
    let registry = Arc::new(UpdaterRegistry::new());
    let counters = Arc::new(UpdaterCounters::default());
    let visited: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    for type_name in type_names {
        let factory_counters = Arc::clone(&counters);
        let factory_visited = Arc::clone(&visited);
        registry.register(
            *type_name,
            Capabilities::NONE,
            Arc::new(move |_, _| {
                Box::new(RecordingUpdater {
                    counters: Arc::clone(&factory_counters),
                    visited: Arc::clone(&factory_visited),
                })
            }),
        );
    }
    (registry, counters, visited)
}

/// A fully wired manager over the canonical test stage and an empty
/// scene.
pub struct BridgeFixture {
    /// The persisted hierarchy.
    pub stage: Arc<Stage>,
    /// The editable hierarchy.
    pub scene: Arc<SceneGraph>,
    /// The updater registry the manager dispatches through.
    pub registry: Arc<UpdaterRegistry>,
    /// Collects the transactions the manager commits.
    pub sink: Arc<MemoryUndoSink>,
    /// The manager under test.
    pub manager: Arc<SyncManager>,
}

impl BridgeFixture {
    /// Builds the fixture with an empty registry (fallback dispatch only).
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Arc::new(UpdaterRegistry::new()))
    }

    /// Builds the fixture around a caller-supplied registry.
    #[must_use]
    pub fn with_registry(registry: Arc<UpdaterRegistry>) -> Self {
        let stage = test_stage();
        let scene = Arc::new(SceneGraph::new());
        let sink = Arc::new(MemoryUndoSink::new());
        let manager = SyncManager::new(
            Arc::clone(&stage),
            Arc::clone(&scene),
            Arc::clone(&registry),
            Arc::clone(&sink) as Arc<dyn UndoSink>,
        );
        Self {
            stage,
            scene,
            registry,
            sink,
            manager,
        }
    }

    /// Parses a stage path, panicking on malformed test input.
    #[must_use]
    pub fn path(&self, text: &str) -> StagePath {
        StagePath::parse(text).expect("test path")
    }

    /// Parses a cross path, panicking on malformed test input.
    #[must_use]
    pub fn cross(&self, text: &str) -> CrossPath {
        CrossPath::parse(text).expect("test cross path")
    }
}

impl Default for BridgeFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenebridge_core::OperationArgs;

    #[test]
    fn fixture_supports_a_full_edit_session() {
        let (registry, counters, visited) = recording_registry(&["Cube"]);
        let f = BridgeFixture::with_registry(registry);

        f.manager
            .pull(&f.cross("/World/Box"), &OperationArgs::default())
            .unwrap();
        // Pull customization resolves by scene node type, so the recording
        // updater (registered for the persisted type) is not hit yet.
        assert!(f.manager.is_pulled(&f.path("/World/Box")).is_some());

        f.manager
            .merge(&f.cross("/World/Box"), &OperationArgs::default())
            .unwrap();
        assert!(counters.copies.load(Ordering::SeqCst) >= 2);
        assert!(counters.ends.load(Ordering::SeqCst) >= 2);
        assert!(visited.lock().contains(&"/World/Box/Lid".to_string()));
        assert_eq!(f.manager.is_pulled(&f.path("/World/Box")), None);
        assert_eq!(f.sink.len(), 2);
    }

    #[test]
    fn canonical_stage_shape() {
        let f = BridgeFixture::new();
        assert!(f.stage.prim_exists(&f.path("/World/Box/Lid")));
        assert_eq!(
            f.stage.prim_type_name(&f.path("/World/Ball")).unwrap(),
            "Sphere"
        );
        assert_eq!(
            f.stage.field(&f.path("/World/Box"), "size"),
            Some(Value::Float(2.0))
        );
    }
}
