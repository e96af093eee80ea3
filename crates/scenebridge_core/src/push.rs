//! The push engine: fold an editable subtree back into the persisted
//! hierarchy.

use crate::crosspath::CrossPath;
use crate::error::SyncResult;
use crate::jobs::ExportOutput;
use crate::manager::Services;
use crate::updater::{CopySpecs, OperationArgs, Updater, UpdaterContext};
use scenebridge_stage::{Layer, StagePath, VisitOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Phases of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushState {
    /// Nothing started yet.
    Idle,
    /// Running the bulk export job.
    Exporting,
    /// Pre-order copy traversal over the export layer.
    CopyTraversal,
    /// Post-order finalization traversal.
    EndTraversal,
    /// Completed successfully.
    Finalized,
    /// Aborted in some phase.
    Failed,
}

/// What a successful push produced.
pub(crate) struct PushOutcome {
    /// The export job's output, kept for callers that need the path map.
    #[cfg_attr(not(test), allow(dead_code))]
    pub export: ExportOutput,
    /// The destination root the subtree was merged under.
    #[cfg_attr(not(test), allow(dead_code))]
    pub dst_root: StagePath,
}

/// Runs the push phases against the shared engine services. Created fresh
/// per operation.
pub(crate) struct PushEngine<'a> {
    services: &'a Services,
    state: PushState,
}

impl<'a> PushEngine<'a> {
    pub(crate) fn new(services: &'a Services) -> Self {
        Self {
            services,
            state: PushState::Idle,
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn state(&self) -> PushState {
        self.state
    }

    /// Resolves the updater for one export-layer path.
    ///
    /// At the traversal root the type is recovered from the pulled prim:
    /// several persisted types may have mapped to the same generic
    /// editable type during pull, so the export layer's own opinion is not
    /// trustworthy there. Elsewhere the export spec's type is used. A
    /// missing spec yields `None`, which callers treat as a prune.
    fn create_updater(
        &self,
        pulled_path: Option<&StagePath>,
        src_root: &StagePath,
        src_layer: &Layer,
        src_path: &StagePath,
        dst_path: &StagePath,
        path_map: &Arc<HashMap<StagePath, scenebridge_scene::NodeId>>,
    ) -> Option<Box<dyn Updater>> {
        let spec = src_layer.prim(src_path)?;
        let type_name = if src_path == src_root {
            pulled_path
                .and_then(|p| self.services.stage.prim_type_name(p))
                .unwrap_or_else(|| spec.type_name.clone())
        } else {
            spec.type_name.clone()
        };
        let node = path_map
            .get(src_path)
            .copied()
            .filter(|n| self.services.scene.contains(*n));
        let entry = self.services.registry.find_or_fallback(&type_name);
        Some(entry.instantiate(node, CrossPath::from_stage(dst_path.clone())))
    }

    /// Phase 1 (export) and phase 2 (copy + end traversals) of a push.
    ///
    /// `pulled` supplies the explicit destination when it carries a stage
    /// segment; otherwise the subtree merges back under its export path
    /// unchanged. The end traversal is skipped for duplicate/copy
    /// operations.
    pub(crate) fn push(
        &mut self,
        pulled: &CrossPath,
        pulled_path: Option<&StagePath>,
        root_node: scenebridge_scene::NodeId,
        args: &OperationArgs,
    ) -> SyncResult<PushOutcome> {
        let svc = self.services;
        self.state = PushState::Exporting;

        let mut job = svc.exporter.create_job(Arc::clone(&svc.scene), root_node, args);
        let export = match job.write() {
            Ok(export) => export,
            Err(error) => {
                self.state = PushState::Failed;
                return Err(error);
            }
        };
        let src_root = export.root_path.clone();

        let dst_root = match pulled.stage_path() {
            Some(dst) => {
                if args.copy_operation {
                    dst.append_path(src_root.relative_from_root())?
                } else {
                    dst.clone()
                }
            }
            None => src_root.clone(),
        };
        let dst_root_parent = dst_root.parent().unwrap_or_else(StagePath::absolute_root);
        let path_map = Arc::new(export.node_for_path.clone());

        self.state = PushState::CopyTraversal;
        let copy_pass = export.layer.traverse(&src_root, |src_path| {
            // Property spec paths are not an error, just not traversed.
            if !src_path.is_prim_path() {
                return VisitOutcome::Prune;
            }
            let dst_path = match dst_root_parent.append_path(src_path.relative_from_root()) {
                Ok(path) => path,
                Err(error) => return VisitOutcome::Abort(error.to_string()),
            };
            let Some(mut updater) = self.create_updater(
                pulled_path,
                &src_root,
                &export.layer,
                src_path,
                &dst_path,
                &path_map,
            ) else {
                warn!(%src_path, "no spec for path during copy traversal, pruning");
                return VisitOutcome::Prune;
            };
            match updater.push_copy_specs(&export.layer, src_path, &svc.stage, &dst_path) {
                CopySpecs::Continue => VisitOutcome::Continue,
                CopySpecs::Prune => VisitOutcome::Prune,
                CopySpecs::Failed => VisitOutcome::Abort("push copy specs failed".into()),
            }
        });
        if let Err(failure) = copy_pass {
            warn!(path = %failure.path, reason = %failure.reason, "copy traversal aborted");
            self.state = PushState::Failed;
            return Err(failure.into());
        }

        // The end pass is a separate post-order traversal, not a second
        // phase of the same one: parents must outlive their children's
        // finalization. Duplicates skip it entirely.
        if args.copy_operation {
            self.state = PushState::Finalized;
            return Ok(PushOutcome { export, dst_root });
        }

        self.state = PushState::EndTraversal;
        let context = UpdaterContext {
            stage: Arc::clone(&svc.stage),
            scene: Arc::clone(&svc.scene),
            args: args.clone(),
            path_map: Some(Arc::clone(&path_map)),
        };
        let end_pass = export.layer.traverse_postorder(&src_root, |src_path| {
            if !src_path.is_prim_path() {
                return VisitOutcome::Continue;
            }
            let dst_path = match dst_root_parent.append_path(src_path.relative_from_root()) {
                Ok(path) => path,
                Err(error) => return VisitOutcome::Abort(error.to_string()),
            };
            let Some(mut updater) = self.create_updater(
                pulled_path,
                &src_root,
                &export.layer,
                src_path,
                &dst_path,
                &path_map,
            ) else {
                warn!(%src_path, "no spec for path during end traversal, skipping");
                return VisitOutcome::Continue;
            };
            if updater.push_end(&context) {
                VisitOutcome::Continue
            } else {
                VisitOutcome::Abort("push end failed".into())
            }
        });
        if let Err(failure) = end_pass {
            warn!(path = %failure.path, reason = %failure.reason, "end traversal aborted");
            self.state = PushState::Failed;
            return Err(failure.into());
        }

        self.state = PushState::Finalized;
        debug!(%src_root, %dst_root, "push finalized");
        Ok(PushOutcome { export, dst_root })
    }
}
