//! Scratch containers grouping materialized nodes.
//!
//! One reserved-name root container holds one parent container per pulled
//! subtree. The root's lifetime is derived: it exists exactly while at
//! least one parent does, tracked by a bookkeeping flag and re-checked
//! after every removal. A name scan doubles as fallback when the flag and
//! the scene disagree (e.g. after host-driven undo).

use crate::error::{SyncError, SyncResult};
use crate::transaction::{TransactionItem, TransactionRecorder};
use scenebridge_scene::{NodeId, SceneGraph};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reserved name of the top-level scratch root container.
pub const SCRATCH_ROOT_NAME: &str = "__scenebridge__";

/// Manages the scratch root and per-pull parent containers.
pub struct ScratchInfrastructure {
    scene: Arc<SceneGraph>,
    has_pulled_nodes: Arc<AtomicBool>,
}

impl ScratchInfrastructure {
    /// Creates the manager over a scene graph.
    #[must_use]
    pub fn new(scene: Arc<SceneGraph>) -> Self {
        Self {
            scene,
            has_pulled_nodes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while at least one pull parent exists.
    #[must_use]
    pub fn has_pulled_nodes(&self) -> bool {
        self.has_pulled_nodes.load(Ordering::SeqCst)
    }

    /// Locates the scratch root by its reserved name.
    #[must_use]
    pub fn find_root(&self) -> Option<NodeId> {
        self.scene.find_top_level(SCRATCH_ROOT_NAME)
    }

    /// Returns the scratch root, creating it (hidden from outliner views)
    /// if the scene has none. Creation is recorded as a transaction item,
    /// and the bookkeeping flag flips only on first creation.
    pub fn find_or_create_root(&self, recorder: &TransactionRecorder) -> SyncResult<NodeId> {
        if let Some(root) = self.find_root() {
            return Ok(root);
        }

        let root = self.scene.create_node(SCRATCH_ROOT_NAME, "group", None)?;
        self.scene.set_hidden_in_outliner(root, true)?;
        let snapshot = self.scene.snapshot(root)?;
        recorder.push(TransactionItem::NodeCreated {
            scene: Arc::clone(&self.scene),
            snapshot,
        });

        let flag = Arc::clone(&self.has_pulled_nodes);
        let redo_flag = Arc::clone(&flag);
        recorder.execute(
            "mark scene as holding pulled nodes",
            move || {
                redo_flag.store(true, Ordering::SeqCst);
                true
            },
            move || {
                flag.store(false, Ordering::SeqCst);
                true
            },
        );

        Ok(root)
    }

    /// Creates the parent container for one pull, as a child of the root,
    /// named deterministically from the pulled subtree's leaf name.
    pub fn create_parent(
        &self,
        recorder: &TransactionRecorder,
        root: NodeId,
        pulled_leaf: &str,
    ) -> SyncResult<NodeId> {
        let name = self
            .scene
            .unique_child_name(Some(root), &format!("{pulled_leaf}Parent"));
        let parent = self.scene.create_node(&name, "group", Some(root))?;
        let snapshot = self.scene.snapshot(parent)?;
        recorder.push(TransactionItem::NodeCreated {
            scene: Arc::clone(&self.scene),
            snapshot,
        });
        Ok(parent)
    }

    /// Removes a pull parent (which must be empty by now). If that leaves
    /// the root childless, the root is removed too and the bookkeeping
    /// flag flips back. Both deletions are reversible transaction items.
    pub fn remove_parent(
        &self,
        recorder: &TransactionRecorder,
        parent: NodeId,
    ) -> SyncResult<()> {
        if !self.scene.contains(parent) {
            return Err(SyncError::precondition("pull parent no longer exists"));
        }
        let snapshot = self.scene.delete_node(parent)?;
        recorder.push(TransactionItem::NodeDeleted {
            scene: Arc::clone(&self.scene),
            snapshot,
        });

        if let Some(root) = self.find_root() {
            if self.scene.child_count(root)? == 0 {
                let snapshot = self.scene.delete_node(root)?;
                recorder.push(TransactionItem::NodeDeleted {
                    scene: Arc::clone(&self.scene),
                    snapshot,
                });

                let flag = Arc::clone(&self.has_pulled_nodes);
                let redo_flag = Arc::clone(&flag);
                recorder.execute(
                    "mark scene as holding no pulled nodes",
                    move || {
                        redo_flag.store(false, Ordering::SeqCst);
                        true
                    },
                    move || {
                        flag.store(true, Ordering::SeqCst);
                        true
                    },
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Arc<SceneGraph>, ScratchInfrastructure, TransactionRecorder) {
        let scene = Arc::new(SceneGraph::new());
        let scratch = ScratchInfrastructure::new(Arc::clone(&scene));
        (scene, scratch, TransactionRecorder::new())
    }

    #[test]
    fn root_is_created_once_and_hidden() {
        let (scene, scratch, recorder) = fixture();
        assert!(scratch.find_root().is_none());
        assert!(!scratch.has_pulled_nodes());

        let root = scratch.find_or_create_root(&recorder).unwrap();
        assert_eq!(scratch.find_root(), Some(root));
        assert!(scene.hidden_in_outliner(root).unwrap());
        assert!(scratch.has_pulled_nodes());

        // Idempotent: a second call returns the same container.
        assert_eq!(scratch.find_or_create_root(&recorder).unwrap(), root);
        assert_eq!(scene.node_count(), 1);
    }

    #[test]
    fn parent_names_derive_from_pulled_leaf() {
        let (scene, scratch, recorder) = fixture();
        let root = scratch.find_or_create_root(&recorder).unwrap();
        let a = scratch.create_parent(&recorder, root, "Box").unwrap();
        let b = scratch.create_parent(&recorder, root, "Box").unwrap();
        assert_eq!(scene.name(a).unwrap(), "BoxParent");
        assert_eq!(scene.name(b).unwrap(), "BoxParent1");
        assert_eq!(scene.parent(a).unwrap(), Some(root));
    }

    #[test]
    fn root_lifetime_is_derived_from_parents() {
        let (scene, scratch, recorder) = fixture();
        let root = scratch.find_or_create_root(&recorder).unwrap();
        let a = scratch.create_parent(&recorder, root, "A").unwrap();
        let b = scratch.create_parent(&recorder, root, "B").unwrap();

        scratch.remove_parent(&recorder, a).unwrap();
        assert_eq!(scratch.find_root(), Some(root));
        assert!(scratch.has_pulled_nodes());

        scratch.remove_parent(&recorder, b).unwrap();
        assert!(scratch.find_root().is_none());
        assert!(!scratch.has_pulled_nodes());
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn scan_fallback_finds_existing_root() {
        let (scene, scratch, recorder) = fixture();
        let existing = scene
            .create_node(SCRATCH_ROOT_NAME, "group", None)
            .unwrap();
        assert_eq!(scratch.find_or_create_root(&recorder).unwrap(), existing);
    }
}
