//! Per-node-type customization: the updater contract and its dispatch.

use crate::crosspath::CrossPath;
use parking_lot::RwLock;
use scenebridge_scene::{NodeId, SceneGraph};
use scenebridge_stage::{Layer, Stage, StagePath};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Caller-supplied arguments threaded through one operation.
#[derive(Debug, Clone, Default)]
pub struct OperationArgs {
    /// True for one-shot duplicate/copy operations: no records, no locks,
    /// no scratch bookkeeping.
    pub copy_operation: bool,
    /// Free-form arguments forwarded to jobs and updaters.
    pub extra: HashMap<String, String>,
}

impl OperationArgs {
    /// Returns args marking a duplicate/copy operation.
    #[must_use]
    pub fn copy() -> Self {
        Self {
            copy_operation: true,
            ..Self::default()
        }
    }
}

/// What a registered node type supports beyond the basic contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The type may be pulled autonomously when the change listener sees
    /// it resync.
    pub auto_edit: bool,
}

impl Capabilities {
    /// No optional capabilities.
    pub const NONE: Self = Self { auto_edit: false };
    /// Supports autonomous pulling.
    pub const AUTO_EDIT: Self = Self { auto_edit: true };
}

/// Per-node copy/merge decision during the push copy traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySpecs {
    /// The node was handled; descend into its children.
    Continue,
    /// The node was handled; skip its children.
    Prune,
    /// Abort the entire push.
    Failed,
}

/// Everything an updater operation may need: the two hierarchies, the
/// operation arguments, and (during push) the export job's path map.
#[derive(Clone)]
pub struct UpdaterContext {
    /// The persisted hierarchy.
    pub stage: Arc<Stage>,
    /// The editable hierarchy.
    pub scene: Arc<SceneGraph>,
    /// Arguments of the operation in flight.
    pub args: OperationArgs,
    /// Export-layer path to editable node map, present during push.
    pub path_map: Option<Arc<HashMap<StagePath, NodeId>>>,
}

impl UpdaterContext {
    /// Resolves an export-layer path to its editable node, if the context
    /// carries a path map and the node is still alive.
    #[must_use]
    pub fn node_for_path(&self, path: &StagePath) -> Option<NodeId> {
        self.path_map
            .as_ref()
            .and_then(|map| map.get(path).copied())
            .filter(|node| self.scene.contains(*node))
    }
}

/// The per-node customization contract consumed by the pull and push
/// engines.
///
/// Updaters are created fresh per traversed node per phase and discarded
/// immediately after use; they must not be cached across operations.
/// Binary operations report failure by returning false; the engines decide
/// whether that aborts the batch.
pub trait Updater: Send {
    /// Query-only veto: can this node be materialized for editing at all?
    fn can_edit_as_scene(&self) -> bool {
        true
    }

    /// Phase-2 customization after bulk import. May mutate the editable
    /// node and the session overlay.
    fn edit_as_scene(&mut self, _context: &UpdaterContext) -> bool {
        true
    }

    /// Cleanup when an edit session is discarded without merging.
    /// Best-effort: a failure is logged by the caller, never propagated.
    fn discard_edits(&mut self, _context: &UpdaterContext) -> bool {
        true
    }

    /// Phase-2 per-node copy/merge decision during push, invoked in
    /// pre-order over the export layer.
    fn push_copy_specs(
        &mut self,
        src_layer: &Layer,
        src_path: &StagePath,
        dst_stage: &Stage,
        dst_path: &StagePath,
    ) -> CopySpecs;

    /// Phase-2 post-order finalization during push. Only invoked for real
    /// merges, after the whole pre-order pass succeeded.
    fn push_end(&mut self, _context: &UpdaterContext) -> bool {
        true
    }

    /// Queried by the autonomous pull listener: should a freshly resynced
    /// node of this type be pulled immediately?
    fn should_auto_edit(&self) -> bool {
        false
    }
}

/// The updater used when no specialized one is registered for a type.
///
/// It supports generic behavior only: the copy step transfers the node's
/// spec verbatim and descends.
pub struct FallbackUpdater {
    node: Option<NodeId>,
    path: CrossPath,
}

impl FallbackUpdater {
    /// Creates a fallback updater bound to an editable node (when one
    /// exists) and a cross path.
    #[must_use]
    pub fn new(node: Option<NodeId>, path: CrossPath) -> Self {
        Self { node, path }
    }

    /// Returns the bound editable node, if any.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Returns the bound cross path.
    #[must_use]
    pub fn path(&self) -> &CrossPath {
        &self.path
    }
}

impl Updater for FallbackUpdater {
    fn push_copy_specs(
        &mut self,
        src_layer: &Layer,
        src_path: &StagePath,
        dst_stage: &Stage,
        dst_path: &StagePath,
    ) -> CopySpecs {
        match dst_stage.copy_prim_from_layer(src_layer, src_path, dst_path) {
            Ok(()) => CopySpecs::Continue,
            Err(error) => {
                warn!(%src_path, %dst_path, %error, "copy specs failed");
                CopySpecs::Failed
            }
        }
    }
}

/// Builds an updater bound to an editable-side context (absent during
/// read-only queries) and a cross path.
pub type UpdaterFactory = Arc<dyn Fn(Option<NodeId>, CrossPath) -> Box<dyn Updater> + Send + Sync>;

/// One registry entry: the factory plus the type's capability flags.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Factory building the updater.
    pub factory: UpdaterFactory,
    /// Capability flags of the registered type.
    pub capabilities: Capabilities,
}

impl RegistryEntry {
    /// Instantiates the updater.
    #[must_use]
    pub fn instantiate(&self, node: Option<NodeId>, path: CrossPath) -> Box<dyn Updater> {
        (self.factory)(node, path)
    }
}

/// Registry mapping node type names to updater factories.
///
/// Dispatch never fails: a lookup miss lands on the fallback entry, so an
/// updater always exists. Only the updater's own operations can fail.
pub struct UpdaterRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    fallback: RegistryEntry,
}

impl UpdaterRegistry {
    /// Creates a registry whose fallback is [`FallbackUpdater`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fallback: RegistryEntry {
                factory: Arc::new(|node, path| Box::new(FallbackUpdater::new(node, path))),
                capabilities: Capabilities::NONE,
            },
        }
    }

    /// Registers a factory for a type name.
    pub fn register(
        &self,
        type_name: impl Into<String>,
        capabilities: Capabilities,
        factory: UpdaterFactory,
    ) {
        self.entries.write().insert(
            type_name.into(),
            RegistryEntry {
                factory,
                capabilities,
            },
        );
    }

    /// Returns true if a specialized factory is registered for the type.
    #[must_use]
    pub fn has(&self, type_name: &str) -> bool {
        self.entries.read().contains_key(type_name)
    }

    /// Resolves a type name to its entry, falling back to the generic
    /// entry on a miss.
    #[must_use]
    pub fn find_or_fallback(&self, type_name: &str) -> RegistryEntry {
        self.entries
            .read()
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for UpdaterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn cross(text: &str) -> CrossPath {
        CrossPath::parse(text).unwrap()
    }

    #[test]
    fn lookup_miss_lands_on_fallback() {
        let registry = UpdaterRegistry::new();
        assert!(!registry.has("Cube"));
        let entry = registry.find_or_fallback("Cube");
        assert_eq!(entry.capabilities, Capabilities::NONE);
        let updater = entry.instantiate(None, cross("/World/Box"));
        assert!(updater.can_edit_as_scene());
        assert!(!updater.should_auto_edit());
    }

    #[test]
    fn registered_factory_wins() {
        let registry = UpdaterRegistry::new();
        registry.register(
            "Veto",
            Capabilities::AUTO_EDIT,
            Arc::new(|_, _| Box::new(Vetoing)),
        );
        assert!(registry.has("Veto"));
        let entry = registry.find_or_fallback("Veto");
        assert!(entry.capabilities.auto_edit);
        assert!(!entry.instantiate(None, cross("/X")).can_edit_as_scene());
    }

    #[test]
    fn fallback_copy_specs_transfers_spec() {
        let registry = UpdaterRegistry::new();
        let stage = Stage::in_memory("t");
        let mut src = Layer::new("src");
        let src_path = StagePath::parse("/Box").unwrap();
        src.define_prim(&src_path, "Cube").unwrap();

        let dst_path = StagePath::parse("/World/Box").unwrap();
        let mut updater = registry
            .find_or_fallback("Cube")
            .instantiate(None, cross("/World/Box"));
        let result = updater.push_copy_specs(&src, &src_path, &stage, &dst_path);
        assert_eq!(result, CopySpecs::Continue);
        assert_eq!(stage.prim_type_name(&dst_path).unwrap(), "Cube");
    }
}
