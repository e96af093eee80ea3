//! Bidirectional lookup between editable nodes and persisted prims.
//!
//! A pulled prim carries a record in the stage's session layer naming the
//! editable node that materializes it; the node carries the originating
//! cross path in a string attribute. The two records are written and
//! cleared as a pair. Reads tolerate an orphaned or stale record and
//! simply report "not pulled".

use crate::crosspath::CrossPath;
use crate::error::{SyncError, SyncResult};
use crate::transaction::TransactionRecorder;
use scenebridge_scene::{NodeId, SceneGraph};
use scenebridge_stage::{Stage, StagePath};
use std::sync::Arc;

/// Session-layer custom data key holding the editable node path of a
/// pulled prim. Stable for the lifetime of a session.
pub const PULL_RECORD_KEY: &str = "scenebridge:pullTarget";

/// Attribute on an editable node holding the cross path it was pulled
/// from. Stable for the lifetime of a session.
pub const SOURCE_PATH_ATTR: &str = "sourceStagePath";

/// Pure query/mutation wrapper around the record pair. Holds no state of
/// its own and is safe to reconstruct at any time.
#[derive(Clone)]
pub struct PathTranslator {
    stage: Arc<Stage>,
    scene: Arc<SceneGraph>,
}

impl PathTranslator {
    /// Creates a translator over the two hierarchies.
    #[must_use]
    pub fn new(stage: Arc<Stage>, scene: Arc<SceneGraph>) -> Self {
        Self { stage, scene }
    }

    /// Reads the recorded editable node path of a pulled prim, without
    /// resolving it.
    #[must_use]
    pub fn pulled_scene_path(stage: &Stage, path: &StagePath) -> Option<String> {
        stage
            .custom_data(path, PULL_RECORD_KEY)
            .filter(|text| !text.is_empty())
    }

    /// Resolves a persisted prim to the editable node materializing it.
    ///
    /// Returns `None` when no record exists or the recorded node no longer
    /// resolves (a stale record degrades to "not pulled").
    #[must_use]
    pub fn to_editable(&self, path: &StagePath) -> Option<NodeId> {
        let scene_path = Self::pulled_scene_path(&self.stage, path)?;
        self.scene.resolve_path(&scene_path)
    }

    /// Resolves an editable node back to the cross path it was pulled
    /// from.
    #[must_use]
    pub fn to_persisted(&self, node: NodeId) -> Option<CrossPath> {
        let text = self.scene.attr(node, SOURCE_PATH_ATTR)?;
        CrossPath::parse(&text).ok()
    }

    /// Writes the record pair for a completed pull, staged as a reversible
    /// transaction item. The stage-side record lives in the session layer
    /// so authored content is never touched.
    pub fn write_record_pair(
        &self,
        recorder: &TransactionRecorder,
        path: &StagePath,
        node: NodeId,
        pulled: &CrossPath,
    ) -> SyncResult<()> {
        let scene_path = self.scene.path_string(node)?;
        let cross_text = pulled.to_string();

        let stage = Arc::clone(&self.stage);
        let scene = Arc::clone(&self.scene);
        let redo_path = path.clone();
        let redo_scene_path = scene_path.clone();
        let redo_cross = cross_text.clone();
        let redo = move || {
            stage
                .set_custom_data(&redo_path, PULL_RECORD_KEY, &redo_scene_path)
                .is_ok()
                && scene.set_attr(node, SOURCE_PATH_ATTR, &redo_cross).is_ok()
        };

        let stage = Arc::clone(&self.stage);
        let scene = Arc::clone(&self.scene);
        let undo_path = path.clone();
        let undo = move || {
            let _ = stage.clear_custom_data(&undo_path, PULL_RECORD_KEY);
            let _ = scene.clear_attr(node, SOURCE_PATH_ATTR);
            true
        };

        if recorder.execute("write pull records", redo, undo) {
            Ok(())
        } else {
            Err(SyncError::precondition(format!(
                "failed to write pull records for {path}"
            )))
        }
    }

    /// Clears the record pair at the start of a merge or discard, staged
    /// as a reversible transaction item.
    pub fn clear_record_pair(
        &self,
        recorder: &TransactionRecorder,
        path: &StagePath,
    ) -> SyncResult<()> {
        let previous_scene_path = Self::pulled_scene_path(&self.stage, path);
        let node = previous_scene_path
            .as_deref()
            .and_then(|p| self.scene.resolve_path(p));
        let previous_cross = node.and_then(|n| self.scene.attr(n, SOURCE_PATH_ATTR));

        let stage = Arc::clone(&self.stage);
        let scene = Arc::clone(&self.scene);
        let redo_path = path.clone();
        let redo = move || {
            let _ = stage.clear_custom_data(&redo_path, PULL_RECORD_KEY);
            if let Some(n) = node {
                let _ = scene.clear_attr(n, SOURCE_PATH_ATTR);
            }
            true
        };

        let stage = Arc::clone(&self.stage);
        let scene = Arc::clone(&self.scene);
        let undo_path = path.clone();
        let undo = move || {
            if let Some(scene_path) = &previous_scene_path {
                let _ = stage.set_custom_data(&undo_path, PULL_RECORD_KEY, scene_path);
            }
            if let (Some(n), Some(cross)) = (node, &previous_cross) {
                let _ = scene.set_attr(n, SOURCE_PATH_ATTR, cross);
            }
            true
        };

        recorder.execute("clear pull records", redo, undo);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> StagePath {
        StagePath::parse(text).unwrap()
    }

    fn fixture() -> (Arc<Stage>, Arc<SceneGraph>, PathTranslator) {
        let stage = Arc::new(Stage::in_memory("t"));
        stage.define_prim(&p("/World"), "Xform").unwrap();
        stage.define_prim(&p("/World/Box"), "Cube").unwrap();
        let scene = Arc::new(SceneGraph::new());
        let translator = PathTranslator::new(Arc::clone(&stage), Arc::clone(&scene));
        (stage, scene, translator)
    }

    #[test]
    fn record_pair_round_trip() {
        let (stage, scene, translator) = fixture();
        let node = scene.create_node("Box", "group", None).unwrap();
        let recorder = TransactionRecorder::new();
        let cross = CrossPath::from_stage(p("/World/Box"));

        translator
            .write_record_pair(&recorder, &p("/World/Box"), node, &cross)
            .unwrap();
        assert_eq!(translator.to_editable(&p("/World/Box")), Some(node));
        assert_eq!(translator.to_persisted(node), Some(cross));
        // The record lives in the session layer, not in authored content.
        stage.with_root_layer(|root| {
            assert!(root.prim(&p("/World/Box")).unwrap().custom_data.is_empty());
        });

        translator
            .clear_record_pair(&recorder, &p("/World/Box"))
            .unwrap();
        assert_eq!(translator.to_editable(&p("/World/Box")), None);
        assert_eq!(translator.to_persisted(node), None);
        stage.with_session_layer(|session| assert!(session.is_empty()));
    }

    #[test]
    fn stale_record_degrades_to_not_pulled() {
        let (_stage, scene, translator) = fixture();
        let node = scene.create_node("Box", "group", None).unwrap();
        let recorder = TransactionRecorder::new();
        let cross = CrossPath::from_stage(p("/World/Box"));
        translator
            .write_record_pair(&recorder, &p("/World/Box"), node, &cross)
            .unwrap();

        scene.delete_node(node).unwrap();
        assert_eq!(translator.to_editable(&p("/World/Box")), None);
    }

    #[test]
    fn record_writes_are_undoable() {
        let (stage, scene, translator) = fixture();
        let node = scene.create_node("Box", "group", None).unwrap();
        let recorder = TransactionRecorder::new();
        assert!(recorder.open("test"));
        let cross = CrossPath::from_stage(p("/World/Box"));
        translator
            .write_record_pair(&recorder, &p("/World/Box"), node, &cross)
            .unwrap();

        let mut transaction = recorder.take().unwrap();
        assert!(transaction.undo());
        assert_eq!(stage.custom_data(&p("/World/Box"), PULL_RECORD_KEY), None);
        assert_eq!(scene.attr(node, SOURCE_PATH_ATTR), None);

        assert!(transaction.redo());
        assert_eq!(translator.to_editable(&p("/World/Box")), Some(node));
    }
}
