//! The pull engine: materialize a persisted subtree for editing.

use crate::crosspath::CrossPath;
use crate::error::{SyncError, SyncResult};
use crate::manager::{Services, EDIT_SET_NAME};
use crate::transaction::TransactionItem;
use crate::updater::{OperationArgs, UpdaterContext};
use parking_lot::Mutex;
use scenebridge_scene::NodeId;
use scenebridge_stage::StagePath;
use std::sync::Arc;
use tracing::{debug, warn};

/// Phases of a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullState {
    /// Nothing started yet.
    Idle,
    /// Running the bulk import job.
    Importing,
    /// Running per-node customization.
    Customizing,
    /// Completed successfully.
    Finalized,
    /// Aborted in some phase.
    Failed,
}

/// What a successful pull produced.
pub(crate) struct PullOutcome {
    /// The editable root of the materialized subtree.
    pub root: NodeId,
    /// Every created node with the cross path it represents.
    pub imported: Vec<(NodeId, CrossPath)>,
}

/// Runs the two pull phases against the shared engine services. Created
/// fresh per operation.
pub(crate) struct PullEngine<'a> {
    services: &'a Services,
    state: PullState,
}

impl<'a> PullEngine<'a> {
    pub(crate) fn new(services: &'a Services) -> Self {
        Self {
            services,
            state: PullState::Idle,
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn state(&self) -> PullState {
        self.state
    }

    /// Both pull phases: import, then per-node customization.
    pub(crate) fn pull(
        &mut self,
        pulled: &CrossPath,
        pulled_path: &StagePath,
        parent: Option<NodeId>,
        args: &OperationArgs,
    ) -> SyncResult<PullOutcome> {
        let outcome = self.import(pulled, pulled_path, parent, args)?;
        self.customize(&outcome, args)?;
        Ok(outcome)
    }

    /// Phase 1: run the bulk import job and stage the edit-session
    /// bookkeeping.
    ///
    /// For a real edit the import is followed by membership registration,
    /// record writing, render exclusion, and selection, each staged as its
    /// own transaction item so the whole pull undoes atomically. A
    /// duplicate/copy runs the import alone.
    pub(crate) fn import(
        &mut self,
        pulled: &CrossPath,
        pulled_path: &StagePath,
        parent: Option<NodeId>,
        args: &OperationArgs,
    ) -> SyncResult<PullOutcome> {
        let svc = self.services;
        self.state = PullState::Importing;

        let job = svc.importer.create_job(
            Arc::clone(&svc.stage),
            Arc::clone(&svc.scene),
            pulled_path.clone(),
            parent,
            args,
        );
        let job = Arc::new(Mutex::new(job));
        let output = match job.lock().read() {
            Ok(output) if !output.created.is_empty() => output,
            Ok(_) => {
                warn!(%pulled_path, "nothing to edit in the selection");
                self.state = PullState::Failed;
                return Err(SyncError::EmptyImport);
            }
            Err(error) => {
                self.state = PullState::Failed;
                return Err(error);
            }
        };

        // The job already ran, so record its redo/undo without executing.
        let redo_job = Arc::clone(&job);
        let undo_job = Arc::clone(&job);
        svc.recorder.record(
            "bulk import",
            move || redo_job.lock().redo(),
            move || undo_job.lock().undo(),
        );

        let root = output.created[0];
        let imported: Vec<(NodeId, CrossPath)> = output
            .forward
            .iter()
            .map(|(path, node)| (*node, CrossPath::from_stage(path.clone())))
            .collect();

        if !args.copy_operation {
            let scene = Arc::clone(&svc.scene);
            let undo_scene = Arc::clone(&svc.scene);
            svc.recorder.execute(
                "register edited subtree",
                move || scene.add_to_set(EDIT_SET_NAME, root).is_ok(),
                move || {
                    undo_scene.remove_from_set(EDIT_SET_NAME, root);
                    true
                },
            );

            svc.translator
                .write_record_pair(&svc.recorder, pulled_path, root, pulled)?;

            let stage = Arc::clone(&svc.stage);
            let undo_stage = Arc::clone(&svc.stage);
            let exclude_path = pulled_path.clone();
            let include_path = pulled_path.clone();
            if !svc.recorder.execute(
                "exclude pulled prim from rendering",
                move || stage.set_active(&exclude_path, false).is_ok(),
                move || undo_stage.clear_active(&include_path).is_ok(),
            ) {
                warn!(%pulled_path, "could not exclude the pulled prim from rendering");
            }

            let before = svc.scene.selection();
            svc.scene.select(vec![root]);
            svc.recorder.push(TransactionItem::SelectionChanged {
                scene: Arc::clone(&svc.scene),
                before,
                after: vec![root],
            });
        }

        Ok(PullOutcome { root, imported })
    }

    /// Phase 2: per-node customization through each node's updater.
    pub(crate) fn customize(
        &mut self,
        outcome: &PullOutcome,
        args: &OperationArgs,
    ) -> SyncResult<()> {
        let svc = self.services;
        self.state = PullState::Customizing;
        let context = UpdaterContext {
            stage: Arc::clone(&svc.stage),
            scene: Arc::clone(&svc.scene),
            args: args.clone(),
            path_map: None,
        };
        for (node, cross) in &outcome.imported {
            let type_name = svc.scene.type_name(*node)?;
            let entry = svc.registry.find_or_fallback(&type_name);
            let mut updater = entry.instantiate(Some(*node), cross.clone());
            // One failing updater fails the whole customization step;
            // updaters already applied in this batch are not rolled back.
            if !updater.edit_as_scene(&context) {
                warn!(path = %cross, "per-node customization failed, aborting pull");
                self.state = PullState::Failed;
                return Err(SyncError::updater_failed(cross.to_string(), "edit"));
            }
        }

        self.state = PullState::Finalized;
        debug!(nodes = outcome.imported.len(), "pull finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::services_fixture;
    use scenebridge_stage::Value;

    fn p(text: &str) -> StagePath {
        StagePath::parse(text).unwrap()
    }

    #[test]
    fn pull_walks_both_phases() {
        let services = services_fixture();
        services.stage.define_prim(&p("/World"), "Xform").unwrap();
        services
            .stage
            .define_prim(&p("/World/Box"), "Cube")
            .unwrap();
        services
            .stage
            .set_field(&p("/World/Box"), "size", Value::Float(1.0))
            .unwrap();

        assert!(services.recorder.open("test"));
        let cross = CrossPath::from_stage(p("/World/Box"));
        let mut engine = PullEngine::new(&services);
        assert_eq!(engine.state(), PullState::Idle);

        let outcome = engine
            .pull(&cross, &p("/World/Box"), None, &OperationArgs::default())
            .unwrap();
        assert_eq!(engine.state(), PullState::Finalized);
        assert_eq!(outcome.imported.len(), 1);
        assert_eq!(services.scene.name(outcome.root).unwrap(), "Box");
        // Real edits register, record, exclude, and select.
        assert_eq!(services.scene.set_members(EDIT_SET_NAME), vec![outcome.root]);
        assert!(!services.stage.is_active(&p("/World/Box")));
        assert_eq!(services.scene.selection(), vec![outcome.root]);
        assert!(!services.recorder.take().unwrap().is_empty());
    }

    #[test]
    fn copy_pull_skips_bookkeeping() {
        let services = services_fixture();
        services.stage.define_prim(&p("/World"), "Xform").unwrap();
        services
            .stage
            .define_prim(&p("/World/Box"), "Cube")
            .unwrap();

        assert!(services.recorder.open("test"));
        let cross = CrossPath::from_stage(p("/World/Box"));
        let mut engine = PullEngine::new(&services);
        let outcome = engine
            .pull(&cross, &p("/World/Box"), None, &OperationArgs::copy())
            .unwrap();

        assert!(services.scene.set_members(EDIT_SET_NAME).is_empty());
        assert!(services.stage.is_active(&p("/World/Box")));
        assert!(services
            .scene
            .attr(outcome.root, crate::translator::SOURCE_PATH_ATTR)
            .is_none());
    }

    #[test]
    fn empty_import_aborts() {
        let services = services_fixture();
        services.stage.define_prim(&p("/World"), "Xform").unwrap();
        services
            .stage
            .define_prim(&p("/World/Box"), "Cube")
            .unwrap();
        // An inactive subtree imports nothing.
        services.stage.set_active(&p("/World/Box"), false).unwrap();

        assert!(services.recorder.open("test"));
        let cross = CrossPath::from_stage(p("/World/Box"));
        let mut engine = PullEngine::new(&services);
        let result = engine.pull(&cross, &p("/World/Box"), None, &OperationArgs::default());
        assert!(matches!(result, Err(SyncError::EmptyImport)));
        assert_eq!(engine.state(), PullState::Failed);
        assert_eq!(services.scene.node_count(), 0);
    }
}
