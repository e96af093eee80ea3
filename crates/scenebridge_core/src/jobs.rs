//! The bulk phase-1 job boundary: subtree import and export.
//!
//! The engines treat these jobs as opaque synchronous calls. The reference
//! implementations here walk one hierarchy and produce the other: the
//! importer materializes persisted prims as editable nodes, the exporter
//! writes an editable subtree into a throw-away layer. Both expose the
//! identity maps the engines need for per-node lookups afterwards.

use crate::error::{SyncError, SyncResult};
use crate::translator::SOURCE_PATH_ATTR;
use crate::updater::OperationArgs;
use scenebridge_scene::{NodeId, NodeSnapshot, SceneGraph};
use scenebridge_stage::{Layer, Stage, StagePath, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Attribute recording the persisted type a node was imported from, so an
/// export can recover type identity that the scene-type mapping loses.
pub const SOURCE_TYPE_ATTR: &str = "sourceStageType";

/// Maps persisted prim types to editable node types and back.
///
/// Unmapped persisted types import as the default scene type; unmapped
/// scene types export under their recorded source type, or verbatim.
#[derive(Debug, Clone)]
pub struct TypeMap {
    to_scene: HashMap<String, String>,
    to_stage: HashMap<String, String>,
    default_scene_type: String,
}

impl Default for TypeMap {
    fn default() -> Self {
        Self {
            to_scene: HashMap::new(),
            to_stage: HashMap::new(),
            default_scene_type: "group".to_string(),
        }
    }
}

impl TypeMap {
    /// Creates an empty map with the given default scene type.
    #[must_use]
    pub fn with_default_scene_type(default_scene_type: impl Into<String>) -> Self {
        Self {
            default_scene_type: default_scene_type.into(),
            ..Self::default()
        }
    }

    /// Registers a bidirectional type pair.
    pub fn map(&mut self, stage_type: impl Into<String>, scene_type: impl Into<String>) {
        let stage_type = stage_type.into();
        let scene_type = scene_type.into();
        self.to_stage.insert(scene_type.clone(), stage_type.clone());
        self.to_scene.insert(stage_type, scene_type);
    }

    /// Returns the scene type a persisted type imports as.
    #[must_use]
    pub fn scene_type_for(&self, stage_type: &str) -> &str {
        self.to_scene
            .get(stage_type)
            .map(String::as_str)
            .unwrap_or(&self.default_scene_type)
    }

    /// Returns the persisted type a scene type exports as, when mapped.
    #[must_use]
    pub fn stage_type_for(&self, scene_type: &str) -> Option<&str> {
        self.to_stage.get(scene_type).map(String::as_str)
    }
}

/// Result of a bulk import: the created nodes (subtree root first) and the
/// forward map from source prim path to created node.
#[derive(Debug)]
pub struct ImportOutput {
    /// Created node handles, parents before children.
    pub created: Vec<NodeId>,
    /// Source prim path of each created node, in the same order.
    pub forward: Vec<(StagePath, NodeId)>,
}

/// A bulk import job. `read` runs once; `undo`/`redo` reverse and re-apply
/// the whole import as one unit.
pub trait ImportJob: Send {
    /// Runs the import and returns what was created.
    fn read(&mut self) -> SyncResult<ImportOutput>;
    /// Removes everything the import created.
    fn undo(&mut self) -> bool;
    /// Recreates everything the import created.
    fn redo(&mut self) -> bool;
}

/// Builds import jobs. The engines create one job per operation.
pub trait ImportJobProvider: Send + Sync {
    /// Creates a job importing the persisted subtree at `root`, parenting
    /// the result under `parent` when given.
    fn create_job(
        &self,
        stage: Arc<Stage>,
        scene: Arc<SceneGraph>,
        root: StagePath,
        parent: Option<NodeId>,
        args: &OperationArgs,
    ) -> Box<dyn ImportJob>;
}

/// Reference import job: walks the composed prims under the requested
/// root in default traversal order and creates one editable node per
/// prim, carrying field values across as JSON-encoded attributes.
pub struct SubtreeImporter {
    stage: Arc<Stage>,
    scene: Arc<SceneGraph>,
    root: StagePath,
    parent: Option<NodeId>,
    type_map: Arc<TypeMap>,
    snapshots: Vec<NodeSnapshot>,
}

impl SubtreeImporter {
    /// Creates an importer for one subtree.
    #[must_use]
    pub fn new(
        stage: Arc<Stage>,
        scene: Arc<SceneGraph>,
        root: StagePath,
        parent: Option<NodeId>,
        type_map: Arc<TypeMap>,
    ) -> Self {
        Self {
            stage,
            scene,
            root,
            parent,
            type_map,
            snapshots: Vec::new(),
        }
    }
}

impl ImportJob for SubtreeImporter {
    fn read(&mut self) -> SyncResult<ImportOutput> {
        let paths = self.stage.prim_paths_under(&self.root);
        let mut by_path: HashMap<StagePath, NodeId> = HashMap::new();
        let mut created = Vec::new();
        let mut forward = Vec::new();

        for path in &paths {
            let parent_node = if *path == self.root {
                self.parent
            } else {
                path.parent().and_then(|p| by_path.get(&p).copied())
            };
            let stage_type = self.stage.prim_type_name(path).unwrap_or_default();
            let scene_type = self.type_map.scene_type_for(&stage_type);
            let name = self.scene.unique_child_name(parent_node, path.name());
            let node = self.scene.create_node(&name, scene_type, parent_node)?;

            for (field, value) in self.stage.fields(path) {
                if let Ok(encoded) = serde_json::to_string(&value) {
                    self.scene.set_attr(node, &field, &encoded)?;
                }
            }
            if !stage_type.is_empty() {
                self.scene.set_attr(node, SOURCE_TYPE_ATTR, &stage_type)?;
            }

            by_path.insert(path.clone(), node);
            created.push(node);
            forward.push((path.clone(), node));
        }

        self.snapshots = created
            .iter()
            .map(|node| self.scene.snapshot(*node))
            .collect::<Result<_, _>>()?;

        Ok(ImportOutput { created, forward })
    }

    fn undo(&mut self) -> bool {
        let mut ok = true;
        for snapshot in self.snapshots.iter().rev() {
            ok &= self.scene.delete_node(snapshot.id).is_ok();
        }
        ok
    }

    fn redo(&mut self) -> bool {
        let mut ok = true;
        for snapshot in &self.snapshots {
            ok &= self.scene.restore(snapshot).is_ok();
        }
        ok
    }
}

/// Provider for [`SubtreeImporter`].
pub struct SubtreeImportProvider {
    type_map: Arc<TypeMap>,
}

impl SubtreeImportProvider {
    /// Creates the provider with the type map its jobs will use.
    #[must_use]
    pub fn new(type_map: Arc<TypeMap>) -> Self {
        Self { type_map }
    }
}

impl ImportJobProvider for SubtreeImportProvider {
    fn create_job(
        &self,
        stage: Arc<Stage>,
        scene: Arc<SceneGraph>,
        root: StagePath,
        parent: Option<NodeId>,
        _args: &OperationArgs,
    ) -> Box<dyn ImportJob> {
        Box::new(SubtreeImporter::new(
            stage,
            scene,
            root,
            parent,
            Arc::clone(&self.type_map),
        ))
    }
}

/// Result of a bulk export: the scratch layer, the root path of the
/// exported subtree within it, and the map from produced prim path back to
/// source node.
#[derive(Debug)]
pub struct ExportOutput {
    /// Path of the exported subtree's root in the scratch layer.
    pub root_path: StagePath,
    /// The produced scratch layer.
    pub layer: Layer,
    /// Produced prim path to source editable node.
    pub node_for_path: HashMap<StagePath, NodeId>,
}

/// A bulk export job. Runs once per push.
pub trait ExportJob: Send {
    /// Runs the export into a fresh in-memory layer.
    fn write(&mut self) -> SyncResult<ExportOutput>;
}

/// Builds export jobs. The engines create one job per operation.
pub trait ExportJobProvider: Send + Sync {
    /// Creates a job exporting the editable subtree rooted at `root`.
    fn create_job(
        &self,
        scene: Arc<SceneGraph>,
        root: NodeId,
        args: &OperationArgs,
    ) -> Box<dyn ExportJob>;
}

/// Reference export job: writes the editable subtree into a scratch layer
/// rooted at `/<root name>`, decoding JSON-encoded attributes back into
/// field values and recovering persisted types from the recorded source
/// type where available.
pub struct SubtreeExporter {
    scene: Arc<SceneGraph>,
    root: NodeId,
    type_map: Arc<TypeMap>,
}

impl SubtreeExporter {
    /// Creates an exporter for one subtree.
    #[must_use]
    pub fn new(scene: Arc<SceneGraph>, root: NodeId, type_map: Arc<TypeMap>) -> Self {
        Self {
            scene,
            root,
            type_map,
        }
    }

    fn export_node(
        &self,
        layer: &mut Layer,
        node_for_path: &mut HashMap<StagePath, NodeId>,
        node: NodeId,
        path: &StagePath,
    ) -> SyncResult<()> {
        let scene_type = self.scene.type_name(node)?;
        let mapped = self.type_map.stage_type_for(&scene_type).map(String::from);
        let stage_type = self
            .scene
            .attr(node, SOURCE_TYPE_ATTR)
            .or(mapped)
            .unwrap_or(scene_type);
        layer.define_prim(path, &stage_type)?;

        for (key, raw) in self.scene.attrs(node)? {
            if key == SOURCE_TYPE_ATTR || key == SOURCE_PATH_ATTR {
                continue;
            }
            let value = serde_json::from_str::<Value>(&raw)
                .unwrap_or_else(|_| Value::String(raw.clone()));
            if let Some(spec) = layer.prim_mut(path) {
                spec.fields.insert(key, value);
            }
        }
        node_for_path.insert(path.clone(), node);

        for child in self.scene.children(node)? {
            let child_path = path.append_child(&self.scene.name(child)?)?;
            self.export_node(layer, node_for_path, child, &child_path)?;
        }
        Ok(())
    }
}

impl ExportJob for SubtreeExporter {
    fn write(&mut self) -> SyncResult<ExportOutput> {
        if !self.scene.contains(self.root) {
            return Err(SyncError::export_failed("export root no longer exists"));
        }
        let mut layer = Layer::new("push-scratch");
        let mut node_for_path = HashMap::new();
        let root_path = StagePath::absolute_root().append_child(&self.scene.name(self.root)?)?;
        self.export_node(&mut layer, &mut node_for_path, self.root, &root_path)?;
        Ok(ExportOutput {
            root_path,
            layer,
            node_for_path,
        })
    }
}

/// Provider for [`SubtreeExporter`].
pub struct SubtreeExportProvider {
    type_map: Arc<TypeMap>,
}

impl SubtreeExportProvider {
    /// Creates the provider with the type map its jobs will use.
    #[must_use]
    pub fn new(type_map: Arc<TypeMap>) -> Self {
        Self { type_map }
    }
}

impl ExportJobProvider for SubtreeExportProvider {
    fn create_job(
        &self,
        scene: Arc<SceneGraph>,
        root: NodeId,
        _args: &OperationArgs,
    ) -> Box<dyn ExportJob> {
        Box::new(SubtreeExporter::new(
            scene,
            root,
            Arc::clone(&self.type_map),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> StagePath {
        StagePath::parse(text).unwrap()
    }

    fn sample_stage() -> Arc<Stage> {
        let stage = Arc::new(Stage::in_memory("t"));
        stage.define_prim(&p("/World"), "Xform").unwrap();
        stage.define_prim(&p("/World/Box"), "Cube").unwrap();
        stage.define_prim(&p("/World/Box/Lid"), "Cube").unwrap();
        stage
            .set_field(&p("/World/Box"), "size", Value::Float(2.0))
            .unwrap();
        stage
    }

    #[test]
    fn import_materializes_subtree() {
        let stage = sample_stage();
        let scene = Arc::new(SceneGraph::new());
        let mut importer = SubtreeImporter::new(
            Arc::clone(&stage),
            Arc::clone(&scene),
            p("/World/Box"),
            None,
            Arc::new(TypeMap::default()),
        );
        let output = importer.read().unwrap();

        assert_eq!(output.created.len(), 2);
        let root = output.created[0];
        assert_eq!(scene.name(root).unwrap(), "Box");
        assert_eq!(scene.type_name(root).unwrap(), "group");
        assert_eq!(scene.attr(root, SOURCE_TYPE_ATTR).unwrap(), "Cube");
        assert_eq!(scene.attr(root, "size").unwrap(), "{\"Float\":2.0}");
        assert_eq!(output.forward[0].0, p("/World/Box"));
        assert_eq!(scene.children(root).unwrap().len(), 1);
    }

    #[test]
    fn import_undo_redo_round_trip() {
        let stage = sample_stage();
        let scene = Arc::new(SceneGraph::new());
        let mut importer = SubtreeImporter::new(
            Arc::clone(&stage),
            Arc::clone(&scene),
            p("/World/Box"),
            None,
            Arc::new(TypeMap::default()),
        );
        let output = importer.read().unwrap();
        assert_eq!(scene.node_count(), 2);

        assert!(importer.undo());
        assert_eq!(scene.node_count(), 0);

        assert!(importer.redo());
        assert_eq!(scene.node_count(), 2);
        assert!(scene.contains(output.created[0]));
    }

    #[test]
    fn export_recovers_types_and_fields() {
        let stage = sample_stage();
        let scene = Arc::new(SceneGraph::new());
        let type_map = Arc::new(TypeMap::default());
        let mut importer = SubtreeImporter::new(
            Arc::clone(&stage),
            Arc::clone(&scene),
            p("/World/Box"),
            None,
            Arc::clone(&type_map),
        );
        let output = importer.read().unwrap();
        let root = output.created[0];

        let mut exporter = SubtreeExporter::new(Arc::clone(&scene), root, type_map);
        let export = exporter.write().unwrap();

        assert_eq!(export.root_path, p("/Box"));
        let spec = export.layer.prim(&p("/Box")).unwrap();
        assert_eq!(spec.type_name, "Cube");
        assert_eq!(spec.fields.get("size"), Some(&Value::Float(2.0)));
        assert_eq!(export.layer.prim(&p("/Box/Lid")).unwrap().type_name, "Cube");
        assert_eq!(export.node_for_path.get(&p("/Box")), Some(&root));
    }

    #[test]
    fn type_map_round_trips_registered_pairs() {
        let mut map = TypeMap::default();
        map.map("Cube", "polyCube");
        assert_eq!(map.scene_type_for("Cube"), "polyCube");
        assert_eq!(map.stage_type_for("polyCube"), Some("Cube"));
        assert_eq!(map.scene_type_for("Unknown"), "group");
        assert_eq!(map.stage_type_for("unknown"), None);
    }
}
