//! The orchestrating façade: pull, merge, discard, duplicate.

use crate::crosspath::{CrossPath, Hierarchy};
use crate::error::{SyncError, SyncResult};
use crate::jobs::{
    ExportJobProvider, ImportJobProvider, SubtreeExportProvider, SubtreeImportProvider, TypeMap,
};
use crate::notify::{BridgeObserver, Notifier};
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::scratch::ScratchInfrastructure;
use crate::transaction::{TransactionItem, TransactionRecorder, UndoSink};
use crate::translator::PathTranslator;
use crate::updater::{OperationArgs, UpdaterContext, UpdaterRegistry};
use scenebridge_scene::{NodeId, SceneGraph};
use scenebridge_stage::{ChangeNotice, Stage, StageObserver, StagePath};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Name of the membership set holding the root of every pulled subtree,
/// for bulk discovery.
pub const EDIT_SET_NAME: &str = "scenebridgeEdits";

/// Shared collaborators of the pull and push engines.
pub(crate) struct Services {
    pub(crate) stage: Arc<Stage>,
    pub(crate) scene: Arc<SceneGraph>,
    pub(crate) registry: Arc<UpdaterRegistry>,
    pub(crate) recorder: Arc<TransactionRecorder>,
    pub(crate) translator: PathTranslator,
    pub(crate) scratch: ScratchInfrastructure,
    pub(crate) importer: Arc<dyn ImportJobProvider>,
    pub(crate) exporter: Arc<dyn ExportJobProvider>,
    pub(crate) notifier: Notifier,
    pub(crate) sink: Arc<dyn UndoSink>,
}

/// Scope guard for the reentrancy flag. Only the scope that flipped the
/// flag clears it, so nesting and early returns both restore the prior
/// state.
struct PushPullScope<'a> {
    flag: &'a AtomicBool,
    owned: bool,
}

impl<'a> PushPullScope<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        let owned = !flag.swap(true, Ordering::SeqCst);
        Self { flag, owned }
    }
}

impl Drop for PushPullScope<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.flag.store(false, Ordering::SeqCst);
        }
    }
}

/// The synchronization façade.
///
/// Owns the reentrancy guard, opens one transaction scope per operation,
/// and listens to stage change notices to pull qualifying subtrees
/// autonomously. Construct with [`SyncManager::new`], which subscribes the
/// manager to the stage.
pub struct SyncManager {
    services: Services,
    in_push_pull: AtomicBool,
}

impl SyncManager {
    /// Creates a manager over the two hierarchies with the reference
    /// import/export jobs and a default type map, and subscribes it to the
    /// stage's change notices.
    pub fn new(
        stage: Arc<Stage>,
        scene: Arc<SceneGraph>,
        registry: Arc<UpdaterRegistry>,
        sink: Arc<dyn UndoSink>,
    ) -> Arc<Self> {
        let type_map = Arc::new(TypeMap::default());
        Self::with_jobs(
            stage,
            scene,
            registry,
            sink,
            Arc::new(SubtreeImportProvider::new(Arc::clone(&type_map))),
            Arc::new(SubtreeExportProvider::new(type_map)),
        )
    }

    /// Creates a manager with caller-supplied bulk job providers.
    pub fn with_jobs(
        stage: Arc<Stage>,
        scene: Arc<SceneGraph>,
        registry: Arc<UpdaterRegistry>,
        sink: Arc<dyn UndoSink>,
        importer: Arc<dyn ImportJobProvider>,
        exporter: Arc<dyn ExportJobProvider>,
    ) -> Arc<Self> {
        let translator = PathTranslator::new(Arc::clone(&stage), Arc::clone(&scene));
        let scratch = ScratchInfrastructure::new(Arc::clone(&scene));
        let manager = Arc::new(Self {
            services: Services {
                stage,
                scene,
                registry,
                recorder: Arc::new(TransactionRecorder::new()),
                translator,
                scratch,
                importer,
                exporter,
                notifier: Notifier::new(),
                sink,
            },
            in_push_pull: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&manager) as Weak<dyn StageObserver>;
        manager.services.stage.subscribe(weak);
        manager
    }

    /// Subscribes an observer to engine notifications.
    pub fn subscribe_observer(&self, observer: Weak<dyn BridgeObserver>) {
        self.services.notifier.subscribe(observer);
    }

    /// Returns true while a pull, merge, discard, or duplicate is running.
    #[must_use]
    pub fn in_push_pull(&self) -> bool {
        self.in_push_pull.load(Ordering::SeqCst)
    }

    /// Returns true while any pulled subtree exists.
    #[must_use]
    pub fn has_pulled_nodes(&self) -> bool {
        self.services.scratch.has_pulled_nodes()
    }

    fn with_transaction<R>(
        &self,
        name: &str,
        f: impl FnOnce(&Services) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let owns = self.services.recorder.open(name);
        let result = f(&self.services);
        if owns {
            // Hand the scope to the host even on failure: partial side
            // effects stay in the log, to be undone by the host's own
            // undo mechanism.
            if let Some(transaction) = self.services.recorder.take() {
                if !transaction.is_empty() {
                    self.services.sink.commit(transaction);
                }
            }
        }
        result
    }

    fn stage_target(path: &CrossPath) -> SyncResult<StagePath> {
        path.stage_path().cloned().ok_or_else(|| {
            SyncError::precondition("the target must address the persisted hierarchy")
        })
    }

    /// Materializes the persisted subtree at `path` for interactive
    /// editing.
    pub fn pull(&self, path: &CrossPath, args: &OperationArgs) -> SyncResult<()> {
        let stage_path = Self::stage_target(path)?;
        if !self.services.stage.prim_exists(&stage_path) {
            return Err(SyncError::precondition(format!(
                "no prim at {stage_path}"
            )));
        }
        let _scope = PushPullScope::enter(&self.in_push_pull);

        self.with_transaction("pull", |svc| {
            let parent = if args.copy_operation {
                None
            } else {
                let root = svc.scratch.find_or_create_root(&svc.recorder)?;
                Some(svc.scratch.create_parent(&svc.recorder, root, stage_path.name())?)
            };

            if !args.copy_operation {
                svc.notifier.object_pre_delete(path);
            }

            let mut engine = PullEngine::new(svc);
            let outcome = engine.pull(path, &stage_path, parent, args)?;

            if !args.copy_operation {
                if let Some(parent) = parent {
                    // Lock the materialized subtree against edits made
                    // outside the sync workflow.
                    svc.scene.lock_subtree(parent, true)?;
                    svc.recorder.push(TransactionItem::LockChanged {
                        scene: Arc::clone(&svc.scene),
                        root: parent,
                        locked: true,
                    });
                }
                let scene_path = svc.scene.path_string(outcome.root)?;
                svc.notifier
                    .object_added(&CrossPath::from_scene(scene_path)?);
            }
            debug!(%stage_path, "pull completed");
            Ok(())
        })
    }

    /// Folds the edits made to the pulled subtree at `path` back into the
    /// persisted hierarchy and ends the edit session.
    pub fn merge(&self, path: &CrossPath, args: &OperationArgs) -> SyncResult<()> {
        let stage_path = Self::stage_target(path)?;
        if !self.services.stage.prim_exists(&stage_path) {
            return Err(SyncError::precondition(format!(
                "no prim at {stage_path}"
            )));
        }
        let _scope = PushPullScope::enter(&self.in_push_pull);

        let node = self
            .services
            .translator
            .to_editable(&stage_path)
            .ok_or_else(|| {
                SyncError::precondition(format!("{stage_path} is not being edited"))
            })?;

        self.with_transaction("merge", |svc| {
            let pull_parent = if args.copy_operation {
                None
            } else {
                let parent = svc.scene.parent(node)?.ok_or_else(|| {
                    SyncError::precondition("pulled subtree has no parent container")
                })?;
                svc.scene.lock_subtree(parent, false)?;
                svc.recorder.push(TransactionItem::LockChanged {
                    scene: Arc::clone(&svc.scene),
                    root: parent,
                    locked: false,
                });
                Some(parent)
            };

            // Reset the selection so nothing holds on to nodes that are
            // about to be deleted.
            let before = svc.scene.selection();
            if !before.is_empty() {
                svc.scene.select(Vec::new());
                svc.recorder.push(TransactionItem::SelectionChanged {
                    scene: Arc::clone(&svc.scene),
                    before,
                    after: Vec::new(),
                });
            }

            if !args.copy_operation {
                let scene_path = svc.scene.path_string(node)?;
                svc.notifier
                    .object_pre_delete(&CrossPath::from_scene(scene_path)?);
            }

            let mut engine = PushEngine::new(svc);
            engine.push(path, Some(&stage_path), node, args)?;

            if !args.copy_operation {
                svc.translator.clear_record_pair(&svc.recorder, &stage_path)?;

                let stage = Arc::clone(&svc.stage);
                let undo_stage = Arc::clone(&svc.stage);
                let include_path = stage_path.clone();
                let exclude_path = stage_path.clone();
                svc.recorder.execute(
                    "restore rendering of merged prim",
                    move || stage.clear_active(&include_path).is_ok(),
                    move || undo_stage.set_active(&exclude_path, false).is_ok(),
                );

                for target in svc.scene.descendants_children_first(node)? {
                    let snapshot = svc.scene.delete_node(target)?;
                    svc.recorder.push(TransactionItem::NodeDeleted {
                        scene: Arc::clone(&svc.scene),
                        snapshot,
                    });
                }
                if let Some(parent) = pull_parent {
                    svc.scratch.remove_parent(&svc.recorder, parent)?;
                }
            }

            let invalidated = stage_path.parent().unwrap_or_else(StagePath::absolute_root);
            svc.notifier
                .subtree_invalidated(&CrossPath::from_stage(invalidated));
            debug!(%stage_path, "merge completed");
            Ok(())
        })
    }

    /// Throws away the edits made to the pulled subtree at `path` and ends
    /// the edit session. No export or merge occurs.
    pub fn discard(&self, path: &CrossPath) -> SyncResult<()> {
        let stage_path = Self::stage_target(path)?;
        let _scope = PushPullScope::enter(&self.in_push_pull);

        let node = self
            .services
            .translator
            .to_editable(&stage_path)
            .ok_or_else(|| {
                SyncError::precondition(format!("{stage_path} is not being edited"))
            })?;

        self.with_transaction("discard edits", |svc| {
            let scene_path = svc.scene.path_string(node)?;
            svc.notifier
                .object_pre_delete(&CrossPath::from_scene(scene_path)?);

            let parent = svc.scene.parent(node)?.ok_or_else(|| {
                SyncError::precondition("pulled subtree has no parent container")
            })?;
            svc.scene.lock_subtree(parent, false)?;
            svc.recorder.push(TransactionItem::LockChanged {
                scene: Arc::clone(&svc.scene),
                root: parent,
                locked: false,
            });

            let before = svc.scene.selection();
            if !before.is_empty() {
                svc.scene.select(Vec::new());
                svc.recorder.push(TransactionItem::SelectionChanged {
                    scene: Arc::clone(&svc.scene),
                    before,
                    after: Vec::new(),
                });
            }

            let context = UpdaterContext {
                stage: Arc::clone(&svc.stage),
                scene: Arc::clone(&svc.scene),
                args: OperationArgs::default(),
                path_map: None,
            };
            for target in svc.scene.descendants_children_first(node)? {
                let type_name = svc.scene.type_name(target)?;
                let entry = svc.registry.find_or_fallback(&type_name);
                let target_path = CrossPath::from_scene(svc.scene.path_string(target)?)?;
                let mut updater = entry.instantiate(Some(target), target_path.clone());
                // Best-effort: one failing discard must not block the
                // cleanup of the remaining nodes.
                if !updater.discard_edits(&context) {
                    warn!(path = %target_path, "discard customization failed, continuing");
                }
                let snapshot = svc.scene.delete_node(target)?;
                svc.recorder.push(TransactionItem::NodeDeleted {
                    scene: Arc::clone(&svc.scene),
                    snapshot,
                });
            }

            svc.translator.clear_record_pair(&svc.recorder, &stage_path)?;

            let stage = Arc::clone(&svc.stage);
            let undo_stage = Arc::clone(&svc.stage);
            let include_path = stage_path.clone();
            let exclude_path = stage_path.clone();
            svc.recorder.execute(
                "restore rendering of discarded prim",
                move || stage.clear_active(&include_path).is_ok(),
                move || undo_stage.set_active(&exclude_path, false).is_ok(),
            );

            svc.scratch.remove_parent(&svc.recorder, parent)?;

            let invalidated = stage_path.parent().unwrap_or_else(StagePath::absolute_root);
            svc.notifier
                .subtree_invalidated(&CrossPath::from_stage(invalidated));
            debug!(%stage_path, "edits discarded");
            Ok(())
        })
    }

    /// One-shot copy between the two hierarchies, in either direction. No
    /// records, locks, or scratch bookkeeping are created. Endpoints in
    /// the same hierarchy are rejected before any side effect.
    pub fn duplicate(
        &self,
        src: &CrossPath,
        dst: &CrossPath,
        args: &OperationArgs,
    ) -> SyncResult<()> {
        let _scope = PushPullScope::enter(&self.in_push_pull);
        let mut copy_args = args.clone();
        copy_args.copy_operation = true;

        match (src.leaf_hierarchy(), dst.leaf_hierarchy()) {
            (Hierarchy::Stage, Hierarchy::Scene) => {
                let stage_path = Self::stage_target(src)?;
                if !self.services.stage.prim_exists(&stage_path) {
                    return Err(SyncError::precondition(format!(
                        "no prim at {stage_path}"
                    )));
                }
                self.with_transaction("duplicate to scene", |svc| {
                    // Duplicates reuse the engine's import phase only; no
                    // per-node customization runs for a one-shot copy.
                    let mut engine = PullEngine::new(svc);
                    engine.import(src, &stage_path, None, &copy_args)?;
                    debug!(%stage_path, "duplicated into the scene");
                    Ok(())
                })
            }
            (Hierarchy::Scene, Hierarchy::Stage) => {
                let scene_text = src.scene_path().ok_or_else(|| {
                    SyncError::precondition("source must address the editable hierarchy")
                })?;
                let node = self.services.scene.resolve_path(scene_text).ok_or_else(|| {
                    SyncError::precondition(format!("no node at {scene_text}"))
                })?;
                self.with_transaction("duplicate to stage", |svc| {
                    let mut job =
                        svc.exporter
                            .create_job(Arc::clone(&svc.scene), node, &copy_args);
                    let export = job.write()?;

                    // Land under the destination root, with a name no
                    // existing sibling uses.
                    let dst_parent = export
                        .root_path
                        .parent()
                        .unwrap_or_else(StagePath::absolute_root);
                    let unique =
                        svc.stage.unique_child_name(&dst_parent, export.root_path.name());
                    let dst_root = dst_parent.append_child(&unique)?;

                    let layer = export.layer.clone();
                    let stage = Arc::clone(&svc.stage);
                    let src_root = export.root_path.clone();
                    let copy_dst = dst_root.clone();
                    let undo_stage = Arc::clone(&svc.stage);
                    let undo_dst = dst_root.clone();
                    let copied = svc.recorder.execute(
                        "copy duplicated subtree",
                        move || {
                            stage
                                .copy_subtree_from_layer(&layer, &src_root, &copy_dst)
                                .is_ok()
                        },
                        move || undo_stage.remove_prim(&undo_dst).is_ok(),
                    );
                    if !copied {
                        return Err(SyncError::export_failed(
                            "could not copy the exported subtree to its destination",
                        ));
                    }

                    svc.notifier.subtree_invalidated(dst);
                    debug!(%dst_root, "duplicated into the stage");
                    Ok(())
                })
            }
            _ => {
                warn!("duplicate endpoints address the same hierarchy");
                Err(SyncError::UnsupportedDuplicate)
            }
        }
    }

    /// Pure query: can the prim at `path` be materialized for editing?
    #[must_use]
    pub fn can_pull(&self, path: &CrossPath) -> bool {
        let Some(stage_path) = path.stage_path() else {
            return false;
        };
        let Some(type_name) = self.services.stage.prim_type_name(stage_path) else {
            return false;
        };
        let entry = self.services.registry.find_or_fallback(&type_name);
        entry
            .instantiate(None, path.clone())
            .can_edit_as_scene()
    }

    /// Read-only query: the editable node materializing the prim at
    /// `path`, when it is currently pulled.
    #[must_use]
    pub fn is_pulled(&self, path: &StagePath) -> Option<NodeId> {
        Self::pulled_node(&self.services.stage, &self.services.scene, path)
    }

    /// Static form of [`SyncManager::is_pulled`].
    #[must_use]
    pub fn pulled_node(stage: &Stage, scene: &SceneGraph, path: &StagePath) -> Option<NodeId> {
        PathTranslator::pulled_scene_path(stage, path)
            .and_then(|scene_path| scene.resolve_path(&scene_path))
    }

    /// Reads the recorded editable node path of a pulled prim without
    /// resolving it.
    #[must_use]
    pub fn pulled_scene_path(stage: &Stage, path: &StagePath) -> Option<String> {
        PathTranslator::pulled_scene_path(stage, path)
    }

    fn try_auto_edit(&self, path: &StagePath) -> bool {
        let Some(type_name) = self.services.stage.prim_type_name(path) else {
            return false;
        };
        let entry = self.services.registry.find_or_fallback(&type_name);
        if !entry.capabilities.auto_edit {
            return false;
        }
        let cross = CrossPath::from_stage(path.clone());
        if !entry.instantiate(None, cross.clone()).should_auto_edit() {
            return false;
        }
        // Autonomous pulls happen outside any host-visible operation, so
        // their transaction items are thrown away.
        let _muted = self.services.recorder.mute();
        if let Err(error) = self.pull(&cross, &OperationArgs::default()) {
            warn!(%path, %error, "autonomous pull failed");
        }
        true
    }
}

impl StageObserver for SyncManager {
    fn stage_changed(&self, notice: &ChangeNotice) {
        if self.in_push_pull() {
            return;
        }

        for resynced in &notice.resynced {
            // A whole-document resync carries no actionable target.
            if resynced.is_absolute_root() || !resynced.is_prim_path() {
                continue;
            }
            let mut pruned: Option<StagePath> = None;
            for path in self.services.stage.prim_paths_under(resynced) {
                if let Some(prefix) = &pruned {
                    if path.has_prefix(prefix) {
                        continue;
                    }
                    pruned = None;
                }
                if self.try_auto_edit(&path) {
                    // The subtree is materialized now; its children are
                    // covered by the pull.
                    pruned = Some(path);
                }
            }
        }

        for changed in &notice.changed_fields {
            if changed.is_property_path() {
                let prim = changed.prim_path();
                if self.services.stage.prim_exists(&prim) {
                    self.try_auto_edit(&prim);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::transaction::MemoryUndoSink;

    /// Builds a bare `Services` bundle for engine unit tests, bypassing
    /// the manager.
    pub(crate) fn services_fixture() -> Services {
        let stage = Arc::new(Stage::in_memory("test"));
        let scene = Arc::new(SceneGraph::new());
        let type_map = Arc::new(TypeMap::default());
        Services {
            translator: PathTranslator::new(Arc::clone(&stage), Arc::clone(&scene)),
            scratch: ScratchInfrastructure::new(Arc::clone(&scene)),
            importer: Arc::new(SubtreeImportProvider::new(Arc::clone(&type_map))),
            exporter: Arc::new(SubtreeExportProvider::new(type_map)),
            registry: Arc::new(UpdaterRegistry::new()),
            recorder: Arc::new(TransactionRecorder::new()),
            notifier: Notifier::new(),
            sink: Arc::new(MemoryUndoSink::new()),
            stage,
            scene,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::MemoryUndoSink;
    use crate::updater::{Capabilities, CopySpecs, Updater};
    use scenebridge_stage::Layer;

    fn p(text: &str) -> StagePath {
        StagePath::parse(text).unwrap()
    }

    fn fixture() -> (Arc<Stage>, Arc<SceneGraph>, Arc<MemoryUndoSink>, Arc<SyncManager>) {
        let stage = Arc::new(Stage::in_memory("test"));
        let scene = Arc::new(SceneGraph::new());
        let registry = Arc::new(UpdaterRegistry::new());
        let sink = Arc::new(MemoryUndoSink::new());
        let manager = SyncManager::new(
            Arc::clone(&stage),
            Arc::clone(&scene),
            registry,
            Arc::clone(&sink) as Arc<dyn UndoSink>,
        );
        (stage, scene, sink, manager)
    }

    #[test]
    fn pull_rejects_missing_prims() {
        let (_stage, _scene, sink, manager) = fixture();
        let result = manager.pull(
            &CrossPath::parse("/World/Missing").unwrap(),
            &OperationArgs::default(),
        );
        assert!(matches!(result, Err(SyncError::Precondition { .. })));
        // Rejected before any side effect: no transaction was opened.
        assert!(sink.is_empty());
    }

    #[test]
    fn pull_rejects_scene_targets() {
        let (_stage, _scene, _sink, manager) = fixture();
        let result = manager.pull(
            &CrossPath::parse("|some|node").unwrap(),
            &OperationArgs::default(),
        );
        assert!(matches!(result, Err(SyncError::Precondition { .. })));
    }

    #[test]
    fn merge_requires_an_edit_session() {
        let (stage, _scene, _sink, manager) = fixture();
        stage.define_prim(&p("/World"), "Xform").unwrap();
        let result = manager.merge(
            &CrossPath::parse("/World").unwrap(),
            &OperationArgs::default(),
        );
        assert!(matches!(result, Err(SyncError::Precondition { .. })));
    }

    struct Vetoing;

    impl Updater for Vetoing {
        fn can_edit_as_scene(&self) -> bool {
            false
        }

        fn push_copy_specs(
            &mut self,
            _src_layer: &Layer,
            _src_path: &StagePath,
            _dst_stage: &Stage,
            _dst_path: &StagePath,
        ) -> CopySpecs {
            CopySpecs::Prune
        }
    }

    #[test]
    fn can_pull_consults_the_updater() {
        let (stage, scene, sink, _manager) = fixture();
        let registry = Arc::new(UpdaterRegistry::new());
        registry.register("Veto", Capabilities::NONE, Arc::new(|_, _| Box::new(Vetoing)));
        let manager = SyncManager::new(
            stage.clone(),
            scene,
            registry,
            sink as Arc<dyn UndoSink>,
        );

        stage.define_prim(&p("/World"), "Xform").unwrap();
        stage.define_prim(&p("/World/Box"), "Cube").unwrap();
        stage.define_prim(&p("/World/Door"), "Veto").unwrap();

        assert!(manager.can_pull(&CrossPath::parse("/World/Box").unwrap()));
        assert!(!manager.can_pull(&CrossPath::parse("/World/Door").unwrap()));
        assert!(!manager.can_pull(&CrossPath::parse("/World/Missing").unwrap()));
        assert!(!manager.can_pull(&CrossPath::parse("|scene|node").unwrap()));
    }

    #[test]
    fn reentrancy_flag_restores_on_exit() {
        let (_stage, _scene, _sink, manager) = fixture();
        assert!(!manager.in_push_pull());
        // A failing operation must restore the flag on its error path.
        let _ = manager.pull(
            &CrossPath::parse("/Missing").unwrap(),
            &OperationArgs::default(),
        );
        assert!(!manager.in_push_pull());
    }
}
